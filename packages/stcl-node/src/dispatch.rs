//! Maps a decoded `Request` onto the node's action table. Every action is a
//! single `match` arm; an unrecognized action name is a data-level error
//! ("invalid action") rather than a missing handler, and never panics.

use serde_json::json;
use stcl_types::model::NodeSettings;
use stcl_types::wire::{Request, Response};
use tracing::{info, warn};

use crate::acquisition::Acquisition;
use crate::lock_engine::{LaserId, LockEngine};

/// Parse a `"a|b|c"` or `"a,b,c"` separated value string into pieces.
fn split_value(value: &str) -> Vec<&str> {
    value.split(|c| c == '|' || c == ',').map(str::trim).collect()
}

#[derive(serde::Deserialize)]
struct SetPeakFinder {
    laser: String,
    #[serde(flatten)]
    config: stcl_types::model::PeakFinderConfig,
}

fn laser_id(name: &str) -> Option<LaserId> {
    match name {
        "Master" | "master" => Some(LaserId::Master),
        "Slave1" | "slave1" => Some(LaserId::Slave1),
        "Slave2" | "slave2" => Some(LaserId::Slave2),
        _ => None,
    }
}

pub async fn dispatch<A: Acquisition>(
    engine: &mut LockEngine<A>,
    request: &Request,
) -> Response {
    match request.action.as_str() {
        "echo" => Response::ok(request.value.clone()),

        "acquire" => match engine.acquire().await {
            Some(trace) => Response::ok(json!([trace.times_ms, trace.channels[0], trace.channels[1]])),
            None => Response::skipped(),
        },

        "acquire_ch" => {
            let ch: usize = request
                .value
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| request.value.as_u64().map(|v| v as usize))
                .unwrap_or(0);
            match engine.acquire_ch(ch).await {
                Some((duration, samples)) => Response::ok(json!([duration, samples])),
                None => Response::skipped(),
            }
        }

        "acquire_ch_n" => {
            let raw = request.value.as_str().unwrap_or("0|0").to_string();
            let parts = split_value(&raw);
            let ch: usize = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
            let n: usize = parts
                .get(1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
                .min(stcl_types::constants::MAX_ACQUIRE_BATCH);
            let traces = engine.acquire_ch_n(ch, n).await;
            let out: Vec<serde_json::Value> = traces
                .into_iter()
                .map(|t| match t {
                    Some((_, samples)) => json!(samples),
                    None => serde_json::Value::Null,
                })
                .collect();
            Response::ok(json!(out))
        }

        "acquire_peaks_ch" => {
            // "<ch>|<a>,<b>|<a>,<b>|..." — pipe between the channel and each
            // range, comma inside a range pair. `split_value` can't be reused
            // here since it treats both separators the same way.
            let raw = request.value.as_str().unwrap_or("").to_string();
            let mut segments = raw.split('|').map(str::trim);
            let ch: usize = segments.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let ranges: Vec<[f64; 2]> = segments
                .filter_map(|pair| {
                    let mut it = pair.split(',').map(str::trim);
                    let a: f64 = it.next()?.parse().ok()?;
                    let b: f64 = it.next()?.parse().ok()?;
                    Some([a, b])
                })
                .collect();
            match engine.acquire_peaks_ch(ch, &ranges).await {
                Some(peaks) => Response::ok(json!(peaks)),
                None => Response::skipped(),
            }
        }

        "set_dec" => {
            if let Some(dec) = request.value.as_u64() {
                engine.set_dec(dec as u32);
                Response::ok(json!("ok"))
            } else {
                Response::ok(json!("Error: set_dec expects an integer"))
            }
        }

        "update_settings" => match serde_json::from_value::<NodeSettings>(request.value.clone()) {
            Ok(wire_settings) => {
                let settings = stcl_types::convert::settings_from_wire(&wire_settings, engine.dec());
                engine.update_settings(settings);
                Response::ok(json!("ok"))
            }
            Err(e) => {
                warn!("rejected update_settings: {e}");
                Response::ok(json!(format!("Error: {e}")))
            }
        },

        "set_peakfinder" => match serde_json::from_value::<SetPeakFinder>(request.value.clone()) {
            Ok(SetPeakFinder { laser, config }) => match laser_id(&laser) {
                Some(id) => {
                    engine.set_peak_finder(id, config.with_defaults());
                    Response::ok(json!("ok"))
                }
                None => Response::ok(json!(format!("Error: unknown laser '{laser}'"))),
            },
            Err(e) => Response::ok(json!(format!("Error: {e}"))),
        },

        "start_lock" => match engine.start().await {
            Ok(()) => {
                info!("lock loop started");
                Response::ok(json!("ok"))
            }
            Err(e) => Response::ok(json!(format!("Error: {e}"))),
        },

        "stop" => {
            engine.stop();
            Response::ok(json!("ok"))
        }

        // Starts the same step loop as `start_lock`; a `monitor`-role node
        // never writes outputs from inside `step`, so this is the
        // subscriber-side equivalent of joining an already-driven cavity.
        "monitor" => match engine.start().await {
            Ok(()) => {
                info!("monitor loop started");
                Response::ok(json!("ok"))
            }
            Err(e) => Response::ok(json!(format!("Error: {e}"))),
        },

        "acquire_errs" => match engine.acquire_errs().await {
            Some(errs) => Response::ok(json!(errs)),
            None => Response::skipped(),
        },

        "show_current" => Response::ok(
            serde_json::to_value(engine.current_settings()).unwrap_or(serde_json::Value::Null),
        ),

        "count" => Response::ok(json!(stcl_types::constants::N_SAMPLES)),

        "test" => Response::ok(json!("ok")),

        other => Response::invalid_action(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SyntheticCavity;
    use stcl_types::model::{MasterConfig, NodeSettings, PeakFinderConfig, PidConfig};

    fn engine() -> LockEngine<SyntheticCavity> {
        let cavity = SyntheticCavity::new(7, [0.05, 0.1]);
        let settings = NodeSettings::Scan {
            master: MasterConfig {
                range: [[0.0, 0.08], [0.09, 0.12]],
                lockpoint: 0.1,
                pid: PidConfig { p: 0.1, i: 0.01, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
                peak_finder: PeakFinderConfig::default(),
                dec: 16,
            },
        };
        LockEngine::new(cavity, settings)
    }

    #[tokio::test]
    async fn echo_returns_value_unchanged() {
        let mut eng = engine();
        let req = Request { action: "echo".to_string(), value: json!("hello") };
        let resp = dispatch(&mut eng, &req).await;
        assert_eq!(resp.result, json!("hello"));
    }

    #[tokio::test]
    async fn unknown_action_reports_invalid_action() {
        let mut eng = engine();
        let req = Request { action: "frobnicate".to_string(), value: serde_json::Value::Null };
        let resp = dispatch(&mut eng, &req).await;
        assert_eq!(resp.result, json!("Error: invalid action 'frobnicate'."));
    }

    #[tokio::test]
    async fn acquire_returns_three_arrays() {
        let mut eng = engine();
        let req = Request { action: "acquire".to_string(), value: serde_json::Value::Null };
        let resp = dispatch(&mut eng, &req).await;
        assert!(resp.result.as_array().map(|a| a.len() == 3).unwrap_or(false));
    }

    #[tokio::test]
    async fn acquire_peaks_ch_parses_pipe_separated_ranges() {
        let mut eng = engine();
        let req = Request {
            action: "acquire_peaks_ch".to_string(),
            value: json!("0|0.0,0.08|0.09,0.12"),
        };
        let resp = dispatch(&mut eng, &req).await;
        assert_eq!(resp.result.as_array().map(|a| a.len()), Some(2));
    }
}
