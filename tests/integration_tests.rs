use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use province_flux::config::{Location, MaestraVersion};
use province_flux::dataset::ProvinceFlowDataset;
use province_flux::store::day_file_name;
use province_flux::{FluxError, PipelineConfig, RunOutcome, process};
use std::io::Write;
use std::path::Path;

const HEADER: &str = "fecha|origen|destino|actividad_origen|actividad_destino|residencia|edad|periodo|distancia|viajes|viajes_km";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn setup(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(root);
    config.code_map_path = config.code_map_path.with_file_name("20_cod_prov.csv");
    std::fs::create_dir_all(config.raw_dir()).unwrap();
    std::fs::create_dir_all(config.code_map_path.parent().unwrap()).unwrap();
    std::fs::write(&config.code_map_path, b"Codigo;Literal\n28;Madrid\n46;Valencia/Val\xe8ncia\n").unwrap();
    config
}

/// Stores a day with 100 trips inside Madrid and 50 from Madrid to Valencia,
/// each split across two rows.
fn write_day(config: &PipelineConfig, day: NaiveDate) {
    let stamp = day.format("%Y%m%d");
    let text = format!(
        "{HEADER}\n\
         {stamp}|2807901|2807901|casa|trabajo_estudio|28|NA|08|0.5-2|60,000|120,5\n\
         {stamp}|2807901|2807902|casa|otros|28|NA|18|2-10|40|80\n\
         {stamp}|2807901|4601501|casa|otros|28|NA|09|>50|25,5|5.000\n\
         {stamp}|2807902|4601502|otros|casa|28|NA|19|>50|24,5|4.000\n"
    );
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    let path = config
        .raw_dir()
        .join(day_file_name(day, MaestraVersion::Maestra1, Location::Municipios));
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn summary(outcome: RunOutcome) -> province_flux::RunSummary {
    match outcome {
        RunOutcome::Written(summary) => summary,
        RunOutcome::NoInput => panic!("expected the dataset to be written"),
    }
}

#[tokio::test]
async fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 2, 21));
    write_day(&config, date(2020, 2, 22));

    let summary = summary(process(&config).await.unwrap());

    assert_eq!(summary.days, 2);
    assert_eq!(summary.total_rows, 4);
    assert_eq!(summary.first, Some(date(2020, 2, 21)));
    assert_eq!(summary.last, Some(date(2020, 2, 22)));

    let bytes = std::fs::read(&config.output_path).unwrap();
    assert_eq!(
        bytes,
        b"date;province origin;province id origin;province destination;province id destination;flux\n\
          2020-02-21;Madrid;28;Madrid;28;100\n\
          2020-02-21;Madrid;28;Valencia/Val\xe8ncia;46;50\n\
          2020-02-22;Madrid;28;Madrid;28;100\n\
          2020-02-22;Madrid;28;Valencia/Val\xe8ncia;46;50\n"
            .to_vec()
    );
}

#[tokio::test]
async fn test_full_run_without_input_writes_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());

    let summary = summary(process(&config).await.unwrap());

    assert_eq!(summary.total_rows, 0);
    let content = std::fs::read_to_string(&config.output_path).unwrap();
    assert_eq!(
        content,
        "date;province origin;province id origin;province destination;province id destination;flux\n"
    );
}

#[tokio::test]
async fn test_full_run_without_input_keeps_existing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 2, 21));
    summary(process(&config).await.unwrap());
    let before = std::fs::read(&config.output_path).unwrap();

    let other_source = config
        .clone()
        .with_source(MaestraVersion::Maestra2, Location::Distritos);
    std::fs::create_dir_all(other_source.raw_dir()).unwrap();

    assert_eq!(process(&other_source).await.unwrap(), RunOutcome::NoInput);
    assert_eq!(std::fs::read(&config.output_path).unwrap(), before);
}

#[tokio::test]
async fn test_reads_ine_spreadsheet() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path());
    config.code_map_path = config.code_map_path.with_file_name("20_cod_prov.xlsx");
    std::fs::copy(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/20_cod_prov.xlsx"),
        &config.code_map_path,
    )
    .unwrap();
    write_day(&config, date(2020, 2, 21));

    summary(process(&config).await.unwrap());

    let dataset = ProvinceFlowDataset::load(&config.output_path).unwrap();
    let names: Vec<_> = dataset
        .records
        .iter()
        .map(|r| r.destination_name.as_deref().unwrap())
        .collect();
    assert_eq!(names, ["Madrid", "Valencia/València"]);
}

#[tokio::test]
async fn test_update_appends_following_days() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 7, 3));
    write_day(&config, date(2020, 7, 4));
    summary(process(&config).await.unwrap());

    write_day(&config, date(2020, 7, 5));
    let update = config.clone().with_update(true, false);
    let summary = summary(process(&update).await.unwrap());

    assert_eq!(summary.days, 1);
    assert_eq!(summary.new_rows, 2);
    assert_eq!(summary.total_rows, 6);

    let dataset = ProvinceFlowDataset::load(&config.output_path).unwrap();
    let dates: Vec<_> = dataset.records.iter().map(|r| r.date).collect();
    assert_eq!(dates[..2], [date(2020, 7, 3), date(2020, 7, 3)]);
    assert_eq!(dates[4..], [date(2020, 7, 5), date(2020, 7, 5)]);
}

#[tokio::test]
async fn test_update_with_gap_leaves_dataset_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 7, 4));
    summary(process(&config).await.unwrap());
    let before = std::fs::read(&config.output_path).unwrap();

    write_day(&config, date(2020, 7, 6));
    let update = config.clone().with_update(true, false);
    let err = process(&update).await.unwrap_err();

    assert!(matches!(err, FluxError::Continuity { .. }));
    assert_eq!(std::fs::read(&config.output_path).unwrap(), before);
}

#[tokio::test]
async fn test_forced_update_accepts_gap() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 7, 4));
    summary(process(&config).await.unwrap());

    write_day(&config, date(2020, 7, 6));
    let forced = config.clone().with_update(true, true);
    let summary = summary(process(&forced).await.unwrap());

    assert_eq!(summary.total_rows, 4);
    assert_eq!(summary.last, Some(date(2020, 7, 6)));
}

#[tokio::test]
async fn test_update_without_new_days_is_no_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 7, 4));
    summary(process(&config).await.unwrap());
    let before = std::fs::read(&config.output_path).unwrap();

    let update = config.clone().with_update(true, false);
    assert_eq!(process(&update).await.unwrap(), RunOutcome::NoInput);
    assert_eq!(std::fs::read(&config.output_path).unwrap(), before);
}

#[tokio::test]
async fn test_update_requires_existing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path()).with_update(true, false);
    write_day(&config, date(2020, 7, 4));

    let err = process(&config).await.unwrap_err();
    assert!(matches!(err, FluxError::MissingDataset { .. }));
}

#[tokio::test]
async fn test_corrupt_day_file_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 2, 21));
    summary(process(&config).await.unwrap());
    let before = std::fs::read(&config.output_path).unwrap();

    let broken = config
        .raw_dir()
        .join(day_file_name(date(2020, 2, 22), MaestraVersion::Maestra1, Location::Municipios));
    std::fs::write(&broken, b"not gzip").unwrap();

    let err = process(&config).await.unwrap_err();
    assert!(matches!(err, FluxError::Parse { .. }));
    assert!(err.to_string().contains("20200222"));
    assert_eq!(std::fs::read(&config.output_path).unwrap(), before);
}

#[tokio::test]
async fn test_missing_code_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    write_day(&config, date(2020, 2, 21));
    std::fs::remove_file(&config.code_map_path).unwrap();

    assert!(process(&config).await.is_err());
    assert!(!config.output_path.exists());
}
