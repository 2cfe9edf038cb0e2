//! Validate a manifest without touching the host

use std::path::Path;

use sysunit::Manifest;

pub async fn check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let plan = Manifest::load(path).await?.plan()?;

    for (name, state) in plan.units() {
        match plan.rejected().get(name) {
            Some(err) => println!("{:<36} {:<11} {}", name, state.as_str(), err),
            None => println!("{:<36} {:<11}", name, "ok"),
        }
    }

    println!();
    println!(
        "{} units, {} rejected",
        plan.units().len(),
        plan.rejected().len()
    );

    if !plan.rejected().is_empty() {
        return Err(format!("{} invalid units", plan.rejected().len()).into());
    }
    Ok(())
}
