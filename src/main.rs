use anyhow::Context;
use clap::Parser;
use fracture_risk::config::{OutputFormat, Settings};
use fracture_risk::core::thresholds;
use fracture_risk::domain::model::CurvePoint;
use fracture_risk::utils::error::ErrorSeverity;
use fracture_risk::utils::{logger, validation::Validate};
use fracture_risk::{
    CliConfig, FractureType, ModelBundle, RawPatientRecord, RiskEngine, RiskError, RiskPipeline,
    RiskReport, RiskRequest,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let (settings, file) = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(e) => fail(&e),
    };

    // 初始化日誌
    if cli.json_logs || file.logging.json {
        logger::init_json_logger(if cli.verbose { "debug" } else { file.logging.level.as_str() });
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting fracture-risk CLI");
    tracing::debug!("Resolved settings: {:?}", settings);

    // 驗證配置
    if let Err(e) = settings.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        fail(&e);
    }

    // 模型只在啟動時載入一次，之後所有請求共用
    let bundle = match ModelBundle::load(&settings.models_dir) {
        Ok(bundle) => Arc::new(bundle),
        Err(e) => {
            tracing::error!("❌ Model bundle failed to load: {}", e);
            fail(&e);
        }
    };

    let raw = read_patient(&cli.patient)?;
    let fracture_types = settings.parsed_fracture_types()?;
    let request = RiskRequest {
        fracture_types: fracture_types.clone(),
        horizon: settings.horizon()?,
        explain: settings.explain,
    };

    let engine = RiskEngine::new(RiskPipeline::new(bundle));
    let report = engine.run(raw.clone(), &request).await;

    let curves = if settings.curve {
        let mut curves = BTreeMap::new();
        for ft in &fracture_types {
            match engine.pipeline().risk_curve(&raw, *ft, &settings.curve_horizons()) {
                Ok(points) => {
                    curves.insert(*ft, points);
                }
                Err(e) => tracing::warn!("❌ {} risk curve unavailable: {}", ft, e),
            }
        }
        curves
    } else {
        BTreeMap::new()
    };

    let categories = if settings.categorize {
        categorize(&raw, &report)
    } else {
        BTreeMap::new()
    };

    match cli.format {
        OutputFormat::Text => print_text(&report, &settings, &curves, &categories),
        OutputFormat::Json => print_json(&report, &curves, &categories)?,
        OutputFormat::Csv => print_csv(&report, &curves, &categories)?,
    }

    if let Some((ft, e)) = report.failures().first() {
        tracing::error!(
            "❌ {} assessment failed: {} (Category: {:?}, Severity: {:?})",
            ft,
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(exit_code(e));
    }

    Ok(())
}

fn exit_code(e: &RiskError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn fail(e: &RiskError) -> ! {
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(exit_code(e).max(1));
}

fn read_patient(source: &str) -> anyhow::Result<RawPatientRecord> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading patient record from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("reading patient record from {}", source))?
    };
    let value: serde_json::Value =
        serde_json::from_str(&content).context("patient record is not valid JSON")?;
    Ok(RawPatientRecord::from_json(value)?)
}

fn categorize(
    raw: &RawPatientRecord,
    report: &RiskReport,
) -> BTreeMap<FractureType, thresholds::RiskCategory> {
    let Some(age) = raw.get("age").and_then(|v| v.as_f64()) else {
        tracing::warn!("Patient record has no numeric age; skipping risk categories");
        return BTreeMap::new();
    };
    report
        .probabilities()
        .into_iter()
        .filter_map(|(ft, p)| {
            thresholds::categorize(age, p, report.horizon.as_years())
                .ok()
                .map(|c| (ft, c))
        })
        .collect()
}

fn print_text(
    report: &RiskReport,
    settings: &Settings,
    curves: &BTreeMap<FractureType, Vec<CurvePoint>>,
    categories: &BTreeMap<FractureType, thresholds::RiskCategory>,
) {
    println!("Fracture risk within {} year(s):", settings.years);
    for (ft, outcome) in &report.outcomes {
        match outcome {
            Ok(assessment) => {
                let category = categories
                    .get(ft)
                    .map(|c| format!("  [{}]", c))
                    .unwrap_or_default();
                println!("  {:<10} {:>6.2}%{}", ft.as_str(), assessment.percent, category);
                if let Some(attribution) = &assessment.attribution {
                    println!("    baseline {:+.4}", attribution.baseline);
                    for c in attribution.top(settings.top_features) {
                        println!(
                            "    {:<32} = {:>8.2}  {:+.4}",
                            c.feature, c.feature_value, c.contribution
                        );
                    }
                }
            }
            Err(e) => println!("  {:<10} error: {}", ft.as_str(), e),
        }
    }
    for (ft, points) in curves {
        println!("Risk curve ({}):", ft);
        for point in points {
            println!(
                "  {:>3} months  {:>6.2}%",
                point.horizon_months,
                fracture_risk::domain::model::to_percent(point.probability)
            );
        }
    }
}

fn print_json(
    report: &RiskReport,
    curves: &BTreeMap<FractureType, Vec<CurvePoint>>,
    categories: &BTreeMap<FractureType, thresholds::RiskCategory>,
) -> anyhow::Result<()> {
    let mut output = serde_json::to_value(report.summary())?;
    if !curves.is_empty() {
        output["curves"] = serde_json::to_value(curves)?;
    }
    if !categories.is_empty() {
        output["categories"] = serde_json::to_value(categories)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_csv(
    report: &RiskReport,
    curves: &BTreeMap<FractureType, Vec<CurvePoint>>,
    categories: &BTreeMap<FractureType, thresholds::RiskCategory>,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(["fracture_type", "horizon_months", "probability", "percent", "category"])?;

    for (ft, assessment) in report
        .outcomes
        .iter()
        .filter_map(|(ft, o)| o.as_ref().ok().map(|a| (ft, a)))
    {
        let category = categories.get(ft).map(|c| c.to_string()).unwrap_or_default();
        writer.write_record([
            ft.to_string(),
            assessment.horizon_months.to_string(),
            assessment.probability.to_string(),
            assessment.percent.to_string(),
            category,
        ])?;
    }
    for (ft, points) in curves {
        for point in points {
            writer.write_record([
                ft.to_string(),
                point.horizon_months.to_string(),
                point.probability.to_string(),
                fracture_risk::domain::model::to_percent(point.probability).to_string(),
                String::new(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
