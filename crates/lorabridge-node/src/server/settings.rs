//! Status page, settings form and save handler

use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::Html,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::AppState;
use lorabridge::ConfigPatch;

/// Delay between answering a save and stopping the loop, so the browser
/// gets its response before the socket goes away
const RESTART_GRACE: Duration = Duration::from_millis(250);

/// Landing page: liveness and loop counters
pub async fn status_page(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, String)> {
    let stats = state
        .loop_handle
        .stats()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let uptime = state.start_time.elapsed().as_secs();

    Ok(Html(format!(
        "<!DOCTYPE html><html><head><title>LoRa Bridge</title></head><body>\
         <h1>LoRa Telemetry Bridge</h1>\
         <p>Up {}m {}s</p>\
         <ul>\
         <li>Frames received: {}</li>\
         <li>Frames forwarded: {}</li>\
         <li>Status reports: {}</li>\
         <li>Sessions established: {}</li>\
         <li>Radio errors: {}</li>\
         <li>Publish errors: {}</li>\
         </ul>\
         <p><a href=\"/settings\">Settings</a></p>\
         </body></html>",
        uptime / 60,
        uptime % 60,
        stats.frames_received,
        stats.frames_forwarded,
        stats.status_reports,
        stats.sessions_established,
        stats.radio_errors,
        stats.publish_errors,
    )))
}

/// Settings form with the current values substituted in. Secrets are
/// never echoed back; an empty secret field means "keep the stored one".
pub async fn settings_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let config = state.store.snapshot();

    Html(format!(
        "<!DOCTYPE html><html><head><title>Bridge Settings</title></head><body>\
         <h1>Bridge Settings</h1>\
         <form method=\"post\" action=\"/save\">\
         <h2>Network</h2>\
         <label>Network name <input name=\"ssid\" value=\"{}\"></label><br>\
         <label>Network secret <input name=\"network_password\" type=\"password\" \
         placeholder=\"(unchanged)\"></label><br>\
         <h2>Message bus</h2>\
         <label>Host <input name=\"bus_host\" value=\"{}\"></label><br>\
         <label>Port <input name=\"bus_port\" value=\"{}\"></label><br>\
         <label>User <input name=\"bus_username\" value=\"{}\"></label><br>\
         <label>Secret <input name=\"bus_password\" type=\"password\" \
         placeholder=\"(unchanged)\"></label><br>\
         <label>Client id <input name=\"bus_client_id\" value=\"{}\"></label><br>\
         <h2>Radio</h2>\
         <label>Isolation code <input name=\"isolation_code\" value=\"0x{:02X}\"></label><br>\
         <label>Report interval (seconds) <input name=\"report_interval_secs\" \
         value=\"{}\"></label><br>\
         <br><button type=\"submit\">Save and restart</button>\
         </form>\
         </body></html>",
        escape(&config.network.ssid),
        escape(&config.bus.host),
        config.bus.port,
        escape(&config.bus.username),
        escape(&config.bus.client_id),
        config.radio.isolation_code,
        config.radio.report_interval.as_secs(),
    ))
}

/// Raw form fields; everything arrives as text and blank means untouched
#[derive(Debug, Default, Deserialize)]
pub struct SaveForm {
    ssid: Option<String>,
    network_password: Option<String>,
    bus_host: Option<String>,
    bus_port: Option<String>,
    bus_username: Option<String>,
    bus_password: Option<String>,
    bus_client_id: Option<String>,
    isolation_code: Option<String>,
    report_interval_secs: Option<String>,
}

/// Merge the form into the store, acknowledge, then restart the bridge
pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SaveForm>,
) -> Result<Html<&'static str>, (StatusCode, String)> {
    let patch = form_to_patch(form).map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    if patch.is_empty() {
        return Ok(Html(
            "<!DOCTYPE html><html><body><p>No changes.</p>\
             <p><a href=\"/settings\">Back</a></p></body></html>",
        ));
    }

    state.store.apply_patch(&patch).map_err(|e| {
        warn!(error = %e, "Settings save failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    info!("Settings saved, scheduling restart");

    let handle = state.loop_handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_GRACE).await;
        let _ = handle.restart().await;
    });

    Ok(Html(
        "<!DOCTYPE html><html><body><p>Saved. The bridge is restarting \
         with the new settings.</p></body></html>",
    ))
}

/// Convert the raw form into a patch: blank fields are dropped, numeric
/// fields must parse
fn form_to_patch(form: SaveForm) -> Result<ConfigPatch, String> {
    let bus_port = match text(form.bus_port) {
        Some(s) => Some(
            s.parse::<u16>()
                .map_err(|_| format!("invalid bus port: {s}"))?,
        ),
        None => None,
    };
    let isolation_code = match text(form.isolation_code) {
        Some(s) => Some(parse_code(&s)?),
        None => None,
    };
    let report_interval_secs = match text(form.report_interval_secs) {
        Some(s) => Some(
            s.parse::<u64>()
                .map_err(|_| format!("invalid report interval: {s}"))?,
        ),
        None => None,
    };

    Ok(ConfigPatch {
        ssid: text(form.ssid),
        network_password: text(form.network_password),
        bus_host: text(form.bus_host),
        bus_port,
        bus_username: text(form.bus_username),
        bus_password: text(form.bus_password),
        bus_client_id: text(form.bus_client_id),
        isolation_code,
        report_interval_secs,
    })
}

/// Blank or whitespace-only fields count as absent
fn text(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Isolation codes are conventionally written in hex but decimal works too
fn parse_code(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|_| format!("invalid isolation code: {s}"))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_form_is_empty_patch() {
        let patch = form_to_patch(SaveForm::default()).unwrap();
        assert!(patch.is_empty());

        let patch = form_to_patch(SaveForm {
            ssid: Some("   ".to_string()),
            bus_port: Some(String::new()),
            ..SaveForm::default()
        })
        .unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_partial_form_touches_only_named_fields() {
        let patch = form_to_patch(SaveForm {
            bus_host: Some("broker.local".to_string()),
            bus_port: Some("1884".to_string()),
            ..SaveForm::default()
        })
        .unwrap();

        assert_eq!(patch.bus_host.as_deref(), Some("broker.local"));
        assert_eq!(patch.bus_port, Some(1884));
        assert!(patch.ssid.is_none());
        assert!(patch.isolation_code.is_none());
    }

    #[test]
    fn test_isolation_code_hex_and_decimal() {
        assert_eq!(parse_code("0xF3").unwrap(), 0xF3);
        assert_eq!(parse_code("0Xf3").unwrap(), 0xF3);
        assert_eq!(parse_code("243").unwrap(), 243);
        assert!(parse_code("0xZZ").is_err());
        assert!(parse_code("300").is_err());
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        let err = form_to_patch(SaveForm {
            bus_port: Some("70000".to_string()),
            ..SaveForm::default()
        })
        .unwrap_err();
        assert!(err.contains("bus port"));

        let err = form_to_patch(SaveForm {
            report_interval_secs: Some("soon".to_string()),
            ..SaveForm::default()
        })
        .unwrap_err();
        assert!(err.contains("report interval"));
    }

    #[test]
    fn test_values_are_escaped_for_markup() {
        assert_eq!(escape("a&b\"<x>"), "a&amp;b&quot;&lt;x&gt;");
    }
}
