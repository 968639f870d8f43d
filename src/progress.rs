//! Progress estimation over a weighted stage table.
//!
//! Two ways to move through the table: `tick` advances on a timer, and
//! `observe_line` follows stage markers and `About NN.NN% done` lines in the
//! scanner's normal output. Either way the reported percentage never goes
//! down and stays at or below [`MAX_RUNNING_PROGRESS`]; reaching 100 is left to
//! the lifecycle controller when the process has actually exited.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::StageSpec;

pub const MAX_RUNNING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub stage: String,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    stages: Vec<StageSpec>,
    total_weight: u32,
    current: usize,
    /// Progress inside the current stage, in thousandths of its weight.
    within: u32,
    /// Timer ticks spent in the current stage.
    ticks: u32,
    last: Option<ProgressUpdate>,
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"About (\d{1,3}(?:\.\d+)?)% done").expect("valid progress pattern")
    })
}

impl ProgressTracker {
    /// `stages` must be non-empty with positive weights; config validation guarantees both.
    pub fn new(stages: &[StageSpec]) -> Self {
        Self {
            total_weight: stages.iter().map(|s| s.weight).sum::<u32>().max(1),
            stages: stages.to_vec(),
            current: 0,
            within: 0,
            ticks: 0,
            last: None,
        }
    }

    pub fn stage(&self) -> &str {
        self.stages.get(self.current).map(|s| s.name.as_str()).unwrap_or("Initializing")
    }

    /// Advance one timer tick. A stage of weight `w` lasts exactly `w` ticks.
    pub fn tick(&mut self) -> Option<ProgressUpdate> {
        let weight = self.stages.get(self.current).map(|s| s.weight).unwrap_or(1).max(1);
        self.ticks = (self.ticks + 1).min(weight);
        let within = u64::from(self.ticks) * 1000 / u64::from(weight);
        self.within = self.within.max(within as u32);
        if self.ticks >= weight && self.current + 1 < self.stages.len() {
            self.enter(self.current + 1);
        }
        self.emit()
    }

    fn enter(&mut self, stage: usize) {
        self.current = stage;
        self.within = 0;
        self.ticks = 0;
    }

    /// Feed one line of scanner output.
    pub fn observe_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(next) = self
            .stages
            .iter()
            .enumerate()
            .skip(self.current + 1)
            .find(|(_, s)| s.markers.iter().any(|m| line.contains(m.as_str())))
            .map(|(i, _)| i)
        {
            self.enter(next);
        }
        if let Some(caps) = percent_regex().captures(line) {
            if let Ok(pct) = caps[1].parse::<f32>() {
                let within = (pct.clamp(0.0, 100.0) * 10.0) as u32;
                self.within = self.within.max(within);
            }
        }
        self.emit()
    }

    fn overall(&self) -> u8 {
        let done: u32 = self.stages.iter().take(self.current).map(|s| s.weight).sum();
        let weight = self.stages.get(self.current).map(|s| s.weight).unwrap_or(0);
        let scaled = u64::from(done) * 1000 + u64::from(weight) * u64::from(self.within);
        let pct = scaled * 100 / (u64::from(self.total_weight) * 1000);
        pct.min(u64::from(MAX_RUNNING_PROGRESS)) as u8
    }

    /// Report only when something visible changed, and never a lower percentage.
    fn emit(&mut self) -> Option<ProgressUpdate> {
        let floor = self.last.as_ref().map(|l| l.progress).unwrap_or(0);
        let update = ProgressUpdate {
            progress: self.overall().max(floor),
            stage: self.stage().to_string(),
        };
        if self.last.as_ref() == Some(&update) {
            return None;
        }
        self.last = Some(update.clone());
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, weight: u32, markers: &[&str]) -> StageSpec {
        StageSpec {
            name: name.into(),
            weight,
            markers: markers.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn table() -> Vec<StageSpec> {
        vec![
            stage("Initializing", 1, &["Starting Nmap"]),
            stage("Port discovery", 2, &["Initiating SYN Stealth Scan"]),
            stage("Reporting", 1, &["Nmap scan report for"]),
        ]
    }

    #[test]
    fn ticks_walk_the_table_and_cap_below_100() {
        let mut t = ProgressTracker::new(&table());
        let mut seen = Vec::new();
        for _ in 0..20 {
            if let Some(u) = t.tick() {
                seen.push(u);
            }
        }
        let stages: Vec<&str> = seen.iter().map(|u| u.stage.as_str()).collect();
        assert!(stages.contains(&"Port discovery"));
        assert_eq!(seen.last().unwrap().stage, "Reporting");
        assert_eq!(seen.last().unwrap().progress, MAX_RUNNING_PROGRESS);
        assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
    }

    #[test]
    fn first_tick_finishes_a_unit_weight_stage() {
        let mut t = ProgressTracker::new(&table());
        let u = t.tick().unwrap();
        assert_eq!(u, ProgressUpdate { progress: 25, stage: "Port discovery".into() });
    }

    #[test]
    fn a_stage_lasts_as_many_ticks_as_its_weight() {
        let mut t = ProgressTracker::new(&[stage("Scan", 3, &[]), stage("Report", 1, &[])]);
        t.tick();
        t.tick();
        assert_eq!(t.stage(), "Scan");
        assert_eq!(t.tick().unwrap(), ProgressUpdate { progress: 75, stage: "Report".into() });
    }

    #[test]
    fn heavy_stages_still_make_progress() {
        let mut t = ProgressTracker::new(&[stage("Scan", 2000, &[]), stage("Report", 1, &[])]);
        for _ in 0..1000 {
            t.tick();
        }
        assert_eq!(t.stage(), "Scan");
        assert_eq!(t.last.as_ref().unwrap().progress, 49);
        for _ in 0..1000 {
            t.tick();
        }
        assert_eq!(t.stage(), "Report");
    }

    #[test]
    fn live_markers_and_percentages_drive_progress() {
        let mut t = ProgressTracker::new(&table());
        assert_eq!(
            t.observe_line("random noise"),
            Some(ProgressUpdate { progress: 0, stage: "Initializing".into() })
        );
        assert!(t.observe_line("more noise").is_none());
        let u = t.observe_line("Initiating SYN Stealth Scan at 12:00").unwrap();
        assert_eq!(u, ProgressUpdate { progress: 25, stage: "Port discovery".into() });
        let u = t.observe_line("SYN Stealth Scan Timing: About 50.00% done; ETC: 12:01").unwrap();
        assert_eq!(u.progress, 50);
        // A percentage that resets for a later phase must not pull progress back.
        assert!(t.observe_line("Service scan Timing: About 10.00% done").is_none());
        let u = t.observe_line("Nmap scan report for 10.0.0.5").unwrap();
        assert_eq!(u, ProgressUpdate { progress: 75, stage: "Reporting".into() });
        let u = t.observe_line("About 100.00% done").unwrap();
        assert_eq!(u.progress, MAX_RUNNING_PROGRESS);
    }

    #[test]
    fn markers_never_move_backwards() {
        let mut t = ProgressTracker::new(&table());
        t.observe_line("Nmap scan report for x");
        assert!(t.observe_line("Initiating SYN Stealth Scan").is_none());
        assert_eq!(t.stage(), "Reporting");
    }
}
