use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use serde_json::json;
use tether_core::{Args, BridgeHandle, MethodSpec, NativeModule};

const TIMERS_MODULE: &str = "JSTimersExecution";
const TIMERS_METHOD: &str = "callTimers";

/// Live timers keyed by script-side timer ID. Dropping an entry's sender
/// cancels its thread.
type TimerTable = Arc<Mutex<HashMap<u64, TimerEntry>>>;

struct TimerEntry {
    serial: u64,
    _cancel: Sender<()>,
}

/// `Timing`: script timers backed by one sleeping thread per timer.
///
/// Expired timers are reported through `JSTimersExecution.callTimers([[id]])`.
/// Repeating timers keep firing until `deleteTimer` or until the module is
/// released on reload.
#[derive(Default)]
pub struct Timing {
    timers: TimerTable,
    next_serial: u64,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn create_timer(
        &mut self,
        bridge: &BridgeHandle,
        id: u64,
        duration: Duration,
        scheduled_ms: f64,
        repeats: bool,
    ) -> Result<()> {
        let first = duration.saturating_sub(elapsed_since(scheduled_ms).min(duration));
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        self.next_serial += 1;
        let serial = self.next_serial;

        let Ok(mut timers) = self.timers.lock() else {
            bail!("timer table poisoned");
        };
        timers.insert(
            id,
            TimerEntry {
                serial,
                _cancel: cancel_tx,
            },
        );
        drop(timers);

        let table = Arc::clone(&self.timers);
        let bridge = bridge.clone();
        thread::spawn(move || {
            let mut wait = first;
            loop {
                match cancel_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                if !bridge.enqueue_js_call(TIMERS_MODULE, TIMERS_METHOD, vec![json!([id])]) {
                    return;
                }
                if !repeats {
                    break;
                }
                wait = duration.max(Duration::from_millis(1));
            }
            if let Ok(mut timers) = table.lock() {
                if timers.get(&id).is_some_and(|t| t.serial == serial) {
                    timers.remove(&id);
                }
            }
        });
        Ok(())
    }

    fn delete_timer(&mut self, id: u64) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.remove(&id);
        }
    }
}

fn timer_id(args: &Args) -> Result<u64> {
    let raw = args.i64(0)?;
    u64::try_from(raw).map_err(|_| anyhow::anyhow!("argument 0: timer id {raw} is negative"))
}

/// Milliseconds between the script's scheduling timestamp and now. Clock skew
/// in the engine's favour counts as zero.
fn elapsed_since(scheduled_ms: f64) -> Duration {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0);
    let elapsed = now_ms - scheduled_ms;
    if elapsed.is_finite() && elapsed > 0.0 {
        Duration::try_from_secs_f64(elapsed / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Timer duration from script milliseconds. Negative and NaN count as zero.
fn timer_duration(duration_ms: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(duration_ms.max(0.0) / 1000.0)
        .map_err(|_| anyhow::anyhow!("argument 1: duration {duration_ms}ms is out of range"))
}

impl NativeModule for Timing {
    fn name(&self) -> &str {
        "Timing"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::new("createTimer", 4),
            MethodSpec::new("deleteTimer", 1),
        ]
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        match method {
            "createTimer" => {
                let id = timer_id(&args)?;
                let duration = timer_duration(args.f64(1)?)?;
                let scheduled_ms = args.f64(2)?;
                let repeats = args.bool(3)?;
                self.create_timer(bridge, id, duration, scheduled_ms, repeats)
            }
            "deleteTimer" => {
                self.delete_timer(timer_id(&args)?);
                Ok(())
            }
            other => bail!("Timing has no method {other}"),
        }
    }
}

impl Drop for Timing {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.clear();
        }
    }
}
