//! Smoke test that the facade surface is sufficient for the common
//! import-then-chart flow without reaching into core module paths.

use plantseries::ingest::RawPayload;
use plantseries::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn import_and_chart_through_the_prelude() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = ChartEngine::new(tmp.path());

    let payload = RawPayload::new(
        "export.csv",
        "timestamp,temp\n\
         2024-03-01 00:00:00,1.0\n\
         2024-03-01 00:01:00,2.0\n",
    );
    let report = engine.import_files(&[payload], "plant-a", "press-1").await?;
    assert_eq!(report.success_count, 1);

    let request = ChartRequest {
        plant: "plant-a".to_string(),
        machine: "press-1".to_string(),
        range: None,
        x_axis: XAxis::DateTime,
        y_parameters: vec!["temp".to_string()],
        sample_target: 0,
        strategy: "nth-point".parse::<SamplingStrategy>()?,
    };
    let terminal = engine.load_chart_data(request).wait().await;
    match terminal {
        Some(JobEvent::Done { series }) => assert_eq!(series["temp"].len(), 2),
        other => panic!("expected Done, got {other:?}"),
    }
    Ok(())
}
