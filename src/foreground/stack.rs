//! Activity-stack shell source.
//!
//! Parses `cmd activity stack list`. A task record is a `taskId=` line,
//! with `visible=true` either on the same line or on the line that follows
//! it. The dump is also where the home package first shows up
//! (`mActivityType=home`), so it is captured here when the registry does
//! not know it yet.

use crate::error::SourceError;
use crate::foreground::{run_capture, ForegroundSource};
use crate::models::AppRegistry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*taskId=\d+: ([A-Za-z0-9._]+)/").unwrap());

pub struct ActivityStackSource;

impl ActivityStackSource {
    pub fn new() -> Self {
        ActivityStackSource
    }
}

impl Default for ActivityStackSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundSource for ActivityStackSource {
    fn name(&self) -> &'static str {
        "activity-stack"
    }

    fn poll(
        &mut self,
        registry: &mut AppRegistry,
        last: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>, SourceError> {
        let output = run_capture("/system/bin/cmd", &["activity", "stack", "list"])?;
        let cur = parse_stack_list(&output, registry);

        // The system occasionally over-reports visible tasks; a jump of
        // three or more over the previous set is discarded wholesale.
        if cur.len() >= last.len() + 3 {
            log::debug!(
                "[Foreground] Stack dump reported {} visible apps (was {}), discarding",
                cur.len(),
                last.len()
            );
            return Ok(last.clone());
        }
        Ok(cur)
    }
}

/// Parse the dump into the visible uid set, capturing the home package as a
/// side effect when it is not known yet.
pub(crate) fn parse_stack_list(output: &str, registry: &mut AppRegistry) -> BTreeSet<i32> {
    let mut cur = BTreeSet::new();
    let lines: Vec<&str> = output.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if !registry.has_home_package() && line.contains("mActivityType=home") {
            // The next line names the launcher component.
            if let Some(pkg) = lines.get(i + 1).and_then(|l| package_from_component(l)) {
                registry.update_home_package(pkg);
                i += 2;
                continue;
            }
        }

        if let Some(caps) = TASK_RE.captures(line) {
            let visible = line.contains("visible=true")
                || lines.get(i + 1).is_some_and(|l| l.contains("visible=true"));
            if visible {
                let package = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if let Some(uid) = registry.uid_for(package) {
                    if registry.get(uid).is_some_and(|a| !a.is_whitelist()) {
                        cur.insert(uid);
                    }
                }
            }
        }

        i += 1;
    }
    cur
}

/// Extract the package out of a `...{package/activity}...` component ref.
fn package_from_component(line: &str) -> Option<String> {
    let start = line.rfind('{')?;
    let rest = &line[start + 1..];
    let end = rest.find('/')?;
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}
