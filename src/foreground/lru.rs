//! Activity-LRU shell source.
//!
//! Parses `dumpsys activity lru`, which comes in two dialects. With the
//! companion hook installed the first line is the `JARK006_LRU` marker and
//! every following line is a bare `<uid> <level>` pair. Stock dumps (API 29
//! and later) list processes under an `Activities:` header, with the
//! process state as a fixed-width four-byte token at a fixed column.
//!
//! Levels 2..=6 mean the process has some claim to the screen; 2 and 3 are
//! genuinely on top, 4..=6 (persistent notification, floating window) only
//! count for apps marked tolerant.

use crate::error::SourceError;
use crate::foreground::{run_capture, ForegroundSource};
use crate::models::AppRegistry;
use std::collections::BTreeSet;

/// First-line marker of the hook dialect.
pub const HOOK_LRU_MARKER: &str = "JARK006_LRU";

pub struct LruSource {
    sdk_int: i32,
}

impl LruSource {
    pub fn new(sdk_int: i32) -> Self {
        LruSource { sdk_int }
    }
}

impl ForegroundSource for LruSource {
    fn name(&self) -> &'static str {
        "activity-lru"
    }

    fn poll(
        &mut self,
        registry: &mut AppRegistry,
        _last: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>, SourceError> {
        let output = run_capture("/system/bin/dumpsys", &["activity", "lru"])?;
        Ok(parse_lru(&output, self.sdk_int, registry))
    }
}

pub(crate) fn parse_lru(output: &str, sdk_int: i32, registry: &AppRegistry) -> BTreeSet<i32> {
    let mut lines = output.lines();
    let Some(first) = lines.next() else {
        return BTreeSet::new();
    };

    if first.starts_with(HOOK_LRU_MARKER) {
        parse_hook_dialect(lines, registry)
    } else if sdk_int >= 29 {
        parse_stock_dialect(lines, sdk_int, registry)
    } else {
        BTreeSet::new()
    }
}

/// Hook dialect: one `<uid> <level>` pair per line.
fn parse_hook_dialect<'a>(
    lines: impl Iterator<Item = &'a str>,
    registry: &AppRegistry,
) -> BTreeSet<i32> {
    let mut cur = BTreeSet::new();
    for line in lines {
        if !line.starts_with("10") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(uid) = fields.next().and_then(|f| f.parse::<i32>().ok()) else {
            continue;
        };
        let Some(level) = fields.next().and_then(|f| f.parse::<i32>().ok()) else {
            continue;
        };
        if !(2..=6).contains(&level) {
            continue;
        }
        include_if_foreground(&mut cur, registry, uid, level);
    }
    cur
}

/// Process-state tokens, exactly four bytes each at a fixed line offset.
/// Index in this table is the level.
const LEVEL_TOKENS: [&str; 7] = ["PER ", "PERU", "TOP ", "BTOP", "FGS ", "BFGS", "IMPF"];

fn level_from_token(token: &str) -> Option<i32> {
    // PER / PERU (levels 0 and 1) are persistent system processes and are
    // never treated as foreground.
    LEVEL_TOKENS[2..]
        .iter()
        .position(|t| *t == token)
        .map(|i| i as i32 + 2)
}

/// Stock dialect: entries indented under `Activities:`. The line prefix is
/// five bytes (`    #`) on API 29 and three (`  #`) from API 30 on; the
/// state token sits 11 bytes past the entry number for `#1`..`#99` and 12
/// for `#100` and up.
fn parse_stock_dialect<'a>(
    mut lines: impl Iterator<Item = &'a str>,
    sdk_int: i32,
    registry: &AppRegistry,
) -> BTreeSet<i32> {
    let mut cur = BTreeSet::new();

    loop {
        match lines.next() {
            Some(line) if line.trim_start().starts_with("Activities:") => break,
            Some(_) => continue,
            None => return cur,
        }
    }

    let (prefix, offset) = if sdk_int == 29 { ("    #", 5) } else { ("  #", 3) };

    for line in lines {
        // The Activities section ends at the first differently shaped line
        // (Other:, Services: ...).
        if !line.starts_with(prefix) {
            break;
        }
        let rest = &line.as_bytes()[offset..];
        if rest.len() < 3 {
            continue;
        }
        let token_at = offset + if rest[2] == b':' { 11 } else { 12 };
        let Some(token) = line.get(token_at..token_at + 4) else {
            continue;
        };
        let Some(level) = level_from_token(token) else {
            continue;
        };

        let Some(pos) = line.find("/u0a") else { continue };
        let digits: String = line[pos + 4..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let Ok(app_id) = digits.parse::<i32>() else {
            continue;
        };
        include_if_foreground(&mut cur, registry, 10000 + app_id, level);
    }
    cur
}

fn include_if_foreground(cur: &mut BTreeSet<i32>, registry: &AppRegistry, uid: i32, level: i32) {
    let Some(app) = registry.get(uid) else { return };
    if app.is_whitelist() {
        return;
    }
    if level <= 3 || app.is_tolerant {
        cur.insert(uid);
    }
}
