//! Apply a manifest to the host

use std::path::Path;

use sysunit::deploy::executor::{HostFiles, Systemctl, SystemctlReload};
use sysunit::deploy::{Applier, Effect, EffectOutcome, FileState};
use sysunit::Manifest;

pub async fn apply(
    path: &Path,
    dry_run: bool,
    no_ownership: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = Manifest::load(path).await?.plan()?;

    for (name, err) in plan.rejected() {
        println!("{:<36} {:<11} {}", name, "rejected", err);
    }

    if dry_run {
        println!("Would apply:");
        for id in plan.order()? {
            let what = match plan.effect(&id) {
                Some(Effect::File(file)) => match file.state {
                    FileState::Present { .. } => format!("write {}", file.path.display()),
                    FileState::Absent => format!("remove {}", file.path.display()),
                },
                Some(Effect::Service(service)) => format!("enable and start {}", service.name),
                Some(Effect::Reload) => "systemctl daemon-reload (if any file changed)".to_string(),
                None => continue,
            };
            println!("  {:<36} {}", id.to_string(), what);
        }
        return Ok(());
    }

    let files = if no_ownership {
        HostFiles::new().without_ownership()
    } else {
        HostFiles::new()
    };
    let services = Systemctl::default();
    let reload = SystemctlReload::default();

    let report = Applier::new(&files, &services, &reload).apply(&plan).await?;

    for (id, outcome) in &report.effects {
        match outcome {
            EffectOutcome::Failed(err) => {
                println!("{:<36} {:<11} {}", id.to_string(), outcome.as_str(), err)
            }
            EffectOutcome::Skipped { because } => {
                println!("{:<36} {:<11} ({})", id.to_string(), outcome.as_str(), because)
            }
            _ => println!("{:<36} {}", id.to_string(), outcome.as_str()),
        }
    }

    println!();
    println!(
        "{} changed, daemon-reload ran {} time(s)",
        report.changed().count(),
        report.reloads()
    );

    if report.has_failures() {
        let failed: Vec<_> = report.failed_units().collect();
        return Err(format!("Failed units: {}", failed.join(", ")).into());
    }
    Ok(())
}
