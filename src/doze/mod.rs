//! Device-idle ("doze") supervision seam.
//!
//! The scheduler only needs three questions answered: are we in screen-off
//! standby, should we enter it now, should we leave it now. The stock
//! implementation samples screen state through dumpsys at a slow cadence
//! and toggles forced idle around standby; tests script the answers.

use std::process::Command;

/// Decides when the device is in screen-off standby.
pub trait DozeSupervisor: Send {
    fn is_screen_off_standby(&self) -> bool;

    /// Called once per second while awake; true means standby begins now
    /// and the caller should park the foreground state.
    fn check_if_need_to_enter(&mut self) -> bool;

    /// Called on interaction pulses while in standby; true means standby
    /// ends now and the caller should restore the foreground state.
    fn check_if_need_to_exit(&mut self) -> bool;
}

/// How often the screen state is actually sampled while awake.
const ENTER_CHECK_INTERVAL_SEC: i32 = 120;

/// Stock supervisor driven by `dumpsys power`.
pub struct ShellDoze {
    standby: bool,
    sec_until_check: i32,
}

impl ShellDoze {
    pub fn new() -> Self {
        ShellDoze {
            standby: false,
            sec_until_check: ENTER_CHECK_INTERVAL_SEC,
        }
    }

    fn screen_off() -> bool {
        let output = match Command::new("/system/bin/dumpsys")
            .args(["power"])
            .output()
        {
            Ok(out) => out,
            Err(e) => {
                log::debug!("[Doze] dumpsys power failed: {}", e);
                return false;
            }
        };
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().any(|line| {
            let line = line.trim();
            line.starts_with("mWakefulness=")
                && (line.ends_with("Asleep") || line.ends_with("Dozing"))
        })
    }

    fn force_idle(enable: bool) {
        let arg = if enable { "force-idle" } else { "unforce" };
        match Command::new("/system/bin/dumpsys")
            .args(["deviceidle", arg])
            .output()
        {
            Ok(out) if out.status.success() => {}
            Ok(out) => log::debug!(
                "[Doze] deviceidle {} answered {:?}",
                arg,
                out.status.code()
            ),
            Err(e) => log::debug!("[Doze] deviceidle {} failed: {}", arg, e),
        }
    }
}

impl Default for ShellDoze {
    fn default() -> Self {
        Self::new()
    }
}

impl DozeSupervisor for ShellDoze {
    fn is_screen_off_standby(&self) -> bool {
        self.standby
    }

    fn check_if_need_to_enter(&mut self) -> bool {
        if self.standby {
            return false;
        }
        self.sec_until_check -= 1;
        if self.sec_until_check > 0 {
            return false;
        }
        self.sec_until_check = ENTER_CHECK_INTERVAL_SEC;

        if Self::screen_off() {
            log::info!("[Doze] Screen off, entering standby");
            Self::force_idle(true);
            self.standby = true;
            return true;
        }
        false
    }

    fn check_if_need_to_exit(&mut self) -> bool {
        if !self.standby {
            return false;
        }
        if !Self::screen_off() {
            log::info!("[Doze] Screen on, leaving standby");
            Self::force_idle(false);
            self.standby = false;
            self.sec_until_check = ENTER_CHECK_INTERVAL_SEC;
            return true;
        }
        false
    }
}
