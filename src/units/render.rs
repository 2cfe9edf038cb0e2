//! Unit file rendering
//!
//! Serializes a [`UnitSpec`] into systemd's INI-like unit file format. The
//! three section headers are always emitted, directives only when their field
//! is set, and always in the same order, so a given spec renders to the same
//! bytes every time.

use super::UnitSpec;

/// Render the full text of a .service file
pub fn render(spec: &UnitSpec) -> String {
    let mut out = String::new();

    out.push_str("[Unit]\n");
    directive(&mut out, "Description", spec.unit.description.as_deref());
    directive(&mut out, "After", spec.unit.after.as_deref());
    directive(&mut out, "Before", spec.unit.before.as_deref());
    directive(&mut out, "Requires", spec.unit.requires.as_deref());

    let svc = &spec.service;
    out.push_str("\n[Service]\n");
    directive(&mut out, "Type", Some(svc.service_type.as_str()));
    directive(
        &mut out,
        "TimeoutStartSec",
        svc.timeout_start_sec.as_ref().map(|s| s.as_str()),
    );
    directive(&mut out, "Restart", svc.restart.as_deref());
    directive(
        &mut out,
        "RestartSec",
        svc.restart_sec.as_ref().map(|s| s.as_str()),
    );
    if let Some(dir) = &svc.working_directory {
        directive(&mut out, "WorkingDirectory", Some(&*dir.to_string_lossy()));
    }
    if let Some(env) = &svc.environment {
        directive(&mut out, "Environment", Some(format!("\"{}\"", env).as_str()));
    }
    directive(&mut out, "User", svc.user.as_deref());
    directive(&mut out, "Group", svc.group.as_deref());
    for cmd in &svc.exec_start_pre {
        directive(&mut out, "ExecStartPre", Some(cmd.as_str()));
    }
    directive(&mut out, "ExecStart", svc.exec_start.as_deref());
    directive(&mut out, "ExecStop", svc.exec_stop.as_deref());

    out.push_str("\n[Install]\n");
    directive(&mut out, "WantedBy", spec.install.wanted_by.as_deref());

    out
}

fn directive(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
}
