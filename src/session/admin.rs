//! Administrative command channel.
//!
//! Out-of-band tooling talks to the session through a single synchronous
//! entry point: a numeric command id plus JSON-encoded parameters, answered
//! with a status code and a JSON-encoded response.
//!
//! ## Commands
//!
//! | id | command                          | parameters                         |
//! |----|----------------------------------|------------------------------------|
//! | 1  | dynamic debug                    | `{"enable": bool}`                 |
//! | 2  | set idle timeout                 | `{"timeout_ms": u32}`              |
//! | 3  | toggle screen updates            | `{"enable": bool}`                 |
//! | 4  | set color mode                   | `{"display": u64, "mode": ..}`     |
//! | 5  | refresh screen                   | `{"display": u64}`                 |
//! | 6  | set qsync mode                   | `{"display": u64, "mode": ..}`     |
//! | 7  | control idle power collapse      | `{"enable": bool, "synchronous": bool}` |
//! | 8  | display attributes for config    | `{"display": u64, "config": u32}`  |
//! | 9  | display transition event         | `{"display": u64, "event": ..}`    |
//! | 10 | composer status                  | none                               |
//! | 11 | panel luminance attributes       | `{"display": u64, "min": f32, "max": f32}` |

use log::{debug, info, warn, LevelFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::HwcSession;
use crate::error::{HwcError, HwcResult, STATUS_OK};
use crate::types::{ColorMode, ConfigId, DisplayId, DisplayKind, QsyncMode};

/// Stage of a secure-session transition requested by tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionEvent {
    Prepare,
    Start,
    End,
    Unprepare,
}

/// A decoded administrative command.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    DynamicDebug { enable: bool },
    SetIdleTimeout { timeout_ms: u32 },
    ToggleScreenUpdates { enable: bool },
    SetColorMode { display: DisplayId, mode: ColorMode },
    RefreshScreen { display: DisplayId },
    SetQsyncMode { display: DisplayId, mode: QsyncMode },
    ControlIdlePowerCollapse { enable: bool, synchronous: bool },
    GetDisplayAttributesForConfig { display: DisplayId, config: ConfigId },
    SetDisplayTransitionEvent { display: DisplayId, event: TransitionEvent },
    GetComposerStatus,
    SetPanelLuminanceAttributes { display: DisplayId, min: f32, max: f32 },
}

#[derive(Deserialize)]
struct Enable {
    enable: bool,
}

#[derive(Deserialize)]
struct IdleTimeout {
    timeout_ms: u32,
}

#[derive(Deserialize)]
struct OnDisplay {
    display: DisplayId,
}

#[derive(Deserialize)]
struct ColorModeParams {
    display: DisplayId,
    mode: ColorMode,
}

#[derive(Deserialize)]
struct QsyncParams {
    display: DisplayId,
    mode: QsyncMode,
}

#[derive(Deserialize)]
struct IdlePcParams {
    enable: bool,
    #[serde(default)]
    synchronous: bool,
}

#[derive(Deserialize)]
struct ConfigParams {
    display: DisplayId,
    config: ConfigId,
}

#[derive(Deserialize)]
struct TransitionParams {
    display: DisplayId,
    event: TransitionEvent,
}

#[derive(Deserialize)]
struct LuminanceParams {
    display: DisplayId,
    min: f32,
    max: f32,
}

fn decode<T: DeserializeOwned>(params: &[u8]) -> HwcResult<T> {
    serde_json::from_slice(params).map_err(|e| {
        warn!("⚠️ Malformed admin parameters: {}", e);
        HwcError::BadParameter
    })
}

impl AdminCommand {
    /// Decode `params` for command `id`.
    pub fn parse(id: u32, params: &[u8]) -> HwcResult<Self> {
        let command = match id {
            1 => {
                let p: Enable = decode(params)?;
                Self::DynamicDebug { enable: p.enable }
            }
            2 => {
                let p: IdleTimeout = decode(params)?;
                Self::SetIdleTimeout {
                    timeout_ms: p.timeout_ms,
                }
            }
            3 => {
                let p: Enable = decode(params)?;
                Self::ToggleScreenUpdates { enable: p.enable }
            }
            4 => {
                let p: ColorModeParams = decode(params)?;
                Self::SetColorMode {
                    display: p.display,
                    mode: p.mode,
                }
            }
            5 => {
                let p: OnDisplay = decode(params)?;
                Self::RefreshScreen { display: p.display }
            }
            6 => {
                let p: QsyncParams = decode(params)?;
                Self::SetQsyncMode {
                    display: p.display,
                    mode: p.mode,
                }
            }
            7 => {
                let p: IdlePcParams = decode(params)?;
                Self::ControlIdlePowerCollapse {
                    enable: p.enable,
                    synchronous: p.synchronous,
                }
            }
            8 => {
                let p: ConfigParams = decode(params)?;
                Self::GetDisplayAttributesForConfig {
                    display: p.display,
                    config: p.config,
                }
            }
            9 => {
                let p: TransitionParams = decode(params)?;
                Self::SetDisplayTransitionEvent {
                    display: p.display,
                    event: p.event,
                }
            }
            10 => Self::GetComposerStatus,
            11 => {
                let p: LuminanceParams = decode(params)?;
                Self::SetPanelLuminanceAttributes {
                    display: p.display,
                    min: p.min,
                    max: p.max,
                }
            }
            other => {
                warn!("⚠️ Unknown admin command {}", other);
                return Err(HwcError::BadParameter);
            }
        };
        Ok(command)
    }

    pub fn id(&self) -> u32 {
        match self {
            Self::DynamicDebug { .. } => 1,
            Self::SetIdleTimeout { .. } => 2,
            Self::ToggleScreenUpdates { .. } => 3,
            Self::SetColorMode { .. } => 4,
            Self::RefreshScreen { .. } => 5,
            Self::SetQsyncMode { .. } => 6,
            Self::ControlIdlePowerCollapse { .. } => 7,
            Self::GetDisplayAttributesForConfig { .. } => 8,
            Self::SetDisplayTransitionEvent { .. } => 9,
            Self::GetComposerStatus => 10,
            Self::SetPanelLuminanceAttributes { .. } => 11,
        }
    }
}

/// Status plus serialized response of one administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReply {
    pub status: i32,
    pub output: Vec<u8>,
}

impl AdminReply {
    fn from_result(result: HwcResult<Value>) -> Self {
        match result {
            Ok(Value::Null) => Self {
                status: STATUS_OK,
                output: Vec::new(),
            },
            Ok(value) => Self {
                status: STATUS_OK,
                output: serde_json::to_vec(&value).unwrap_or_default(),
            },
            Err(e) => Self {
                status: e.status_code(),
                output: Vec::new(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Decode the response body.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.output).ok()
    }
}

/// Idle power-collapse disable requests are reference counted.
#[derive(Debug, Default)]
pub(super) struct IdlePcState {
    pub(super) disable_count: u32,
}

impl HwcSession {
    /// Dispatch an administrative command.
    pub fn notify_callback(&self, command: u32, params: &[u8]) -> AdminReply {
        let result = AdminCommand::parse(command, params).and_then(|cmd| self.execute_admin(cmd));
        if let Err(e) = &result {
            warn!("⚠️ Admin command {} failed: {}", command, e);
        }
        AdminReply::from_result(result)
    }

    fn execute_admin(&self, command: AdminCommand) -> HwcResult<Value> {
        match command {
            AdminCommand::DynamicDebug { enable } => {
                let level = if enable {
                    LevelFilter::Debug
                } else {
                    LevelFilter::Info
                };
                log::set_max_level(level);
                info!("🔧 Log level set to {}", level);
                Ok(Value::Null)
            }
            AdminCommand::SetIdleTimeout { timeout_ms } => {
                self.apply_idle_timeout(timeout_ms);
                Ok(Value::Null)
            }
            AdminCommand::ToggleScreenUpdates { enable } => {
                self.toggle_screen_updates(enable);
                Ok(Value::Null)
            }
            AdminCommand::SetColorMode { display, mode } => {
                // Wait for in-flight commits before switching the pipeline.
                let seq = self.command_seq.write();
                self.set_color_mode(display, mode)?;
                drop(seq);
                self.request_refresh(display);
                Ok(Value::Null)
            }
            AdminCommand::RefreshScreen { display } => {
                let slot = self.registry.slot(display)?;
                if slot.kind() == DisplayKind::Dummy || !slot.is_bound() {
                    return Err(HwcError::BadDisplay);
                }
                self.request_refresh(display);
                Ok(Value::Null)
            }
            AdminCommand::SetQsyncMode { display, mode } => {
                self.call_display_function(display, |d| d.device_mut().set_qsync_mode(mode))?;
                Ok(Value::Null)
            }
            AdminCommand::ControlIdlePowerCollapse {
                enable,
                synchronous,
            } => {
                self.control_idle_power_collapse(enable, synchronous)?;
                Ok(Value::Null)
            }
            AdminCommand::GetDisplayAttributesForConfig { display, config } => {
                let attributes =
                    self.call_display_function(display, |d| d.device().attributes(config))?;
                serde_json::to_value(attributes).map_err(|_| HwcError::NoResources)
            }
            AdminCommand::SetDisplayTransitionEvent { display, event } => {
                match event {
                    TransitionEvent::Prepare => self.prepare_secure_session(display)?,
                    TransitionEvent::Start => self.start_secure_session(display)?,
                    TransitionEvent::End => self.end_secure_session(display)?,
                    TransitionEvent::Unprepare => self.unprepare_secure_session(display)?,
                }
                Ok(Value::Null)
            }
            AdminCommand::GetComposerStatus => Ok(self.composer_status()),
            AdminCommand::SetPanelLuminanceAttributes { display, min, max } => {
                if !(min >= 0.0 && min < max) {
                    return Err(HwcError::BadParameter);
                }
                if self.registry.slot(display)?.kind() != DisplayKind::Builtin {
                    return Err(HwcError::Unsupported);
                }
                self.call_display_function(display, |d| {
                    d.device_mut().set_panel_luminance(min, max)
                })?;
                Ok(Value::Null)
            }
        }
    }

    /// Push an idle timeout to every builtin panel that supports one.
    pub(super) fn apply_idle_timeout(&self, timeout_ms: u32) {
        let builtins: Vec<DisplayId> = self
            .registry
            .slots_of(DisplayKind::Builtin)
            .filter(|s| s.is_bound())
            .map(|s| s.id())
            .collect();
        for id in builtins {
            match self.call_display_function(id, |d| d.device_mut().set_idle_timeout(timeout_ms)) {
                Ok(()) => info!("⏱️ Display {} idle timeout {} ms", id, timeout_ms),
                Err(HwcError::Unsupported) => {}
                Err(e) => warn!("⚠️ Idle timeout on display {} not applied: {}", id, e),
            }
        }
    }

    fn toggle_screen_updates(&self, enable: bool) {
        let bound: Vec<DisplayId> = self
            .registry
            .slots()
            .filter(|s| s.kind() != DisplayKind::Dummy && s.is_bound())
            .map(|s| s.id())
            .collect();
        for id in bound {
            let toggled = self.call_display_function(id, |d| {
                d.set_screen_updates(enable);
                Ok(())
            });
            if let Err(e) = toggled {
                warn!("⚠️ Screen updates on display {} not toggled: {}", id, e);
            }
        }
        info!(
            "🖥️ Screen updates {}",
            if enable { "resumed" } else { "paused" }
        );
        if enable {
            self.request_refresh(self.primary_display());
        }
    }

    /// Disable requests stack; only the last matching enable re-allows
    /// power collapse. The primary panel is told on the first disable and
    /// the last enable. A synchronous disable takes effect once the primary
    /// has committed again and is rolled back if that never happens.
    fn control_idle_power_collapse(&self, enable: bool, synchronous: bool) -> HwcResult<()> {
        let primary = self.primary_display();
        let mut idle_pc = self.idle_pc.lock();

        if enable {
            if idle_pc.disable_count == 0 {
                warn!("⚠️ Idle power collapse already enabled");
                return Ok(());
            }
            if idle_pc.disable_count == 1 {
                self.apply_idle_power_collapse(primary, true, synchronous)?;
                info!("⚡ Idle power collapse enabled");
            }
            idle_pc.disable_count -= 1;
            return Ok(());
        }

        let first = idle_pc.disable_count == 0;
        if first {
            self.apply_idle_power_collapse(primary, false, synchronous)?;
            info!("⚡ Idle power collapse disabled");
        }
        idle_pc.disable_count += 1;
        drop(idle_pc);

        if synchronous {
            if let Err(e) = self.wait_for_commit_done(primary) {
                let mut idle_pc = self.idle_pc.lock();
                idle_pc.disable_count = idle_pc.disable_count.saturating_sub(1);
                if idle_pc.disable_count == 0 {
                    if let Err(restore) = self.apply_idle_power_collapse(primary, true, false) {
                        warn!("⚠️ Could not re-enable idle power collapse: {}", restore);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply_idle_power_collapse(
        &self,
        display: DisplayId,
        enable: bool,
        synchronous: bool,
    ) -> HwcResult<()> {
        let applied = self.call_display_function(display, |d| {
            d.device_mut().control_idle_power_collapse(enable, synchronous)
        });
        match applied {
            Err(HwcError::Unsupported) => {
                debug!("display {} has no idle power collapse control", display);
                Ok(())
            }
            other => other,
        }
    }

    /// Outstanding idle power-collapse disable requests.
    pub fn idle_power_collapse_disables(&self) -> u32 {
        self.idle_pc.lock().disable_count
    }

    fn composer_status(&self) -> Value {
        let displays: Vec<Value> = self
            .registry
            .slots()
            .map(|s| {
                json!({
                    "id": s.id(),
                    "kind": s.kind(),
                    "state": format!("{:?}", s.state()),
                    "frames": s.commit.lock().frames,
                })
            })
            .collect();
        json!({
            "ready": self.is_ready(),
            "primary": self.primary_display(),
            "secure_session_active": self.is_secure_session_active(),
            "pending_hotplug": self.pending_hotplug_count(),
            "idle_pc_disables": self.idle_power_collapse_disables(),
            "displays": displays,
        })
    }
}
