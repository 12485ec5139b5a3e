//! End-to-end CSV-in/CSV-out integration tests, one per §8 testable
//! property that spans the whole ingest→forecast→write pipeline.

use std::io::Write;
use std::process::Command;

/// Generates `n_seasons` complete 52-week seasons of synthetic weekly
/// observations starting at EW41 of `start_year`, with a mild seasonal
/// climate cycle and a deterministic (non-random) case count so every
/// assertion below is exact.
fn synthetic_csv(start_year: i32, n_seasons: i32) -> String {
    let mut out = String::from(
        "epiweek,cases,temp_min,temp_med,temp_max,precip_min,precip_med,precip_max,pressure_min,pressure_med,pressure_max,rel_humid_min,rel_humid_med,rel_humid_max\n",
    );
    let mut year = start_year;
    let mut week = 41u32;
    for i in 0..(n_seasons * 52) {
        let phase = (i % 52) as f64;
        let temp_med = 25.0 + 5.0 * (2.0 * std::f64::consts::PI * phase / 52.0).sin();
        let precip_med = 80.0 + 60.0 * (2.0 * std::f64::consts::PI * (phase - 10.0) / 52.0).sin();
        let humid_med = 70.0 + 10.0 * (2.0 * std::f64::consts::PI * phase / 52.0).sin();
        let cases = 20 + (i % 15);
        out.push_str(&format!(
            "{year}{week:02},{cases},{tmin},{tmed},{tmax},{pmin},{pmed},{pmax},1000,1010,1020,{hmin},{hmed},{hmax}\n",
            tmin = temp_med - 5.0,
            tmed = temp_med,
            tmax = temp_med + 5.0,
            pmin = (precip_med - 20.0).max(0.0),
            pmed = precip_med,
            pmax = precip_med + 20.0,
            hmin = humid_med - 5.0,
            hmed = humid_med,
            hmax = humid_med + 5.0,
        ));
        week += 1;
        if week > 52 {
            week = 1;
            year += 1;
        }
    }
    out
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_dengue-fcst")
}

fn write_temp(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

#[test]
fn arp_pipeline_runs_end_to_end_and_produces_a_well_formed_output() {
    let csv_text = synthetic_csv(2018, 6);
    let input = write_temp(&csv_text, ".csv");
    let config = write_temp(
        r#"
        model = "arp"
        forecast_target_year = 2023
        validation_window = "t3"
        n_real_arp = 200
        "#,
        ".toml",
    );
    let output = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

    let status = Command::new(bin_path())
        .args([
            "--region",
            "SP",
            "--input",
        ])
        .arg(input.path())
        .args(["--config"])
        .arg(config.path())
        .args(["--output"])
        .arg(output.path())
        .status()
        .unwrap();
    assert!(status.success());

    let contents = std::fs::read_to_string(output.path()).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "date,lower_95,lower_90,lower_80,lower_50,pred,upper_50,upper_80,upper_90,upper_95"
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 52);
    for row in &rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 10);
        let values: Vec<i64> = fields[1..].iter().map(|f| f.parse().unwrap()).collect();
        assert!(values[0] <= values[1]);
        assert!(values[1] <= values[2]);
        assert!(values[2] <= values[3]);
        assert!(values[3] <= values[4]);
        assert!(values[4] <= values[5]);
        assert!(values[5] <= values[6]);
        assert!(values[6] <= values[7]);
        assert!(values[7] <= values[8]);
        assert!(values.iter().all(|&v| v >= 1));
    }
}

#[test]
fn sarimax_pipeline_runs_end_to_end_on_three_seasons() {
    let csv_text = synthetic_csv(2019, 4);
    let input = write_temp(&csv_text, ".csv");
    let config = write_temp(
        r#"
        model = "sarimax"
        forecast_target_year = 2023
        validation_window = "t3"
        "#,
        ".toml",
    );
    let output = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

    let status = Command::new(bin_path())
        .args(["--region", "SP", "--input"])
        .arg(input.path())
        .args(["--config"])
        .arg(config.path())
        .args(["--output"])
        .arg(output.path())
        .status()
        .unwrap();
    assert!(status.success());

    let contents = std::fs::read_to_string(output.path()).unwrap();
    assert_eq!(contents.lines().count(), 53); // header + 52 weeks
}

#[test]
fn rejects_a_region_with_less_than_one_complete_season_with_a_nonzero_exit_code() {
    let csv_text = "epiweek,cases,temp_min,temp_med,temp_max,precip_min,precip_med,precip_max,pressure_min,pressure_med,pressure_max,rel_humid_min,rel_humid_med,rel_humid_max\n202301,10,20,25,30,0,10,50,1000,1010,1020,50,60,70\n";
    let input = write_temp(csv_text, ".csv");
    let config = write_temp(
        r#"
        model = "arp"
        forecast_target_year = 2023
        validation_window = "t3"
        "#,
        ".toml",
    );
    let output = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

    let status = Command::new(bin_path())
        .args(["--region", "SP", "--input"])
        .arg(input.path())
        .args(["--config"])
        .arg(config.path())
        .args(["--output"])
        .arg(output.path())
        .status()
        .unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(2)); // InsufficientData
}

#[test]
fn clidengo_pipeline_runs_end_to_end_and_produces_a_well_formed_output() {
    let csv_text = synthetic_csv(2018, 4);
    let input = write_temp(&csv_text, ".csv");
    let config = write_temp(
        r#"
        model = "clidengo"
        forecast_target_year = 2023
        validation_window = "t3"
        n_real_calibrate = 8
        n_real_forecast = 16
        "#,
        ".toml",
    );
    let output = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

    let status = Command::new(bin_path())
        .args(["--region", "SP", "--input"])
        .arg(input.path())
        .args(["--config"])
        .arg(config.path())
        .args(["--output"])
        .arg(output.path())
        .status()
        .unwrap();
    assert!(status.success());

    let contents = std::fs::read_to_string(output.path()).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "date,lower_95,lower_90,lower_80,lower_50,pred,upper_50,upper_80,upper_90,upper_95"
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 52);
    for row in &rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 10);
        let values: Vec<i64> = fields[1..].iter().map(|f| f.parse().unwrap()).collect();
        assert!(values[0] <= values[1]);
        assert!(values[1] <= values[2]);
        assert!(values[2] <= values[3]);
        assert!(values[3] <= values[4]);
        assert!(values[4] <= values[5]);
        assert!(values[5] <= values[6]);
        assert!(values[6] <= values[7]);
        assert!(values[7] <= values[8]);
        assert!(values.iter().all(|&v| v >= 1));
    }
}

#[test]
fn calendar_contract_first_forecast_row_matches_ew41_opening_date() {
    let csv_text = synthetic_csv(2018, 6);
    let input = write_temp(&csv_text, ".csv");
    let config = write_temp(
        r#"
        model = "arp"
        forecast_target_year = 2023
        validation_window = "t3"
        n_real_arp = 200
        "#,
        ".toml",
    );
    let output = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

    let status = Command::new(bin_path())
        .args(["--region", "SP", "--input"])
        .arg(input.path())
        .args(["--config"])
        .arg(config.path())
        .args(["--output"])
        .arg(output.path())
        .status()
        .unwrap();
    assert!(status.success());

    let contents = std::fs::read_to_string(output.path()).unwrap();
    let first_row = contents.lines().nth(1).unwrap();
    assert!(first_row.starts_with("2023-10-08,"));
}
