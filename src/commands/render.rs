//! Print the unit file for a single set of parameters

use serde_json::Value;
use sysunit::units::{self, UnitSpec};

pub async fn render(name: &str, params: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let params = match params {
        Some(text) => match serde_json::from_str(text)? {
            Value::Object(map) => map,
            other => return Err(format!("--params expects a JSON object, got {}", other).into()),
        },
        None => Default::default(),
    };

    let spec = UnitSpec::from_params(name, &params)?;
    log::debug!("Rendering {}", spec.file_path().display());
    if let Some(timeout) = &spec.service.timeout_start_sec {
        log::debug!("{}: start timeout {:?}", name, timeout.to_duration());
    }
    if let Some(delay) = &spec.service.restart_sec {
        log::debug!("{}: restart delay {:?}", name, delay.to_duration());
    }
    print!("{}", units::render(&spec));

    Ok(())
}
