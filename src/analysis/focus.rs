use chrono::{DateTime, Utc};

use crate::analysis::config::AnalyzerConfig;
use crate::tracking::ForegroundEvent;

/// Output of the analyzer, consumed by the daily aggregates.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusSignal {
    /// A bundle change that survived debouncing.
    ContextSwitch {
        from: String,
        to: String,
        at: DateTime<Utc>,
    },
    /// The switch counted at `at` turned out to be flicker and was undone.
    SwitchRetracted { at: DateTime<Utc> },
    /// A dwell on `bundle_id` that started at `since` crossed the focus
    /// threshold at `at`.
    FocusSessionReached {
        bundle_id: String,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
    },
}

/// One app holding the foreground.
#[derive(Debug, Clone, PartialEq)]
struct Stint {
    bundle_id: String,
    since: DateTime<Utc>,
}

/// Uninterrupted span that may become a focus session.
#[derive(Debug, Clone, PartialEq)]
struct FocusSpan {
    bundle_id: String,
    since: DateTime<Utc>,
    counted: bool,
}

/// The last counted switch, remembered until the app it landed on has held
/// focus for the dwell time, so a flicker back can undo it.
#[derive(Debug, Clone)]
struct CountedSwitch {
    origin: Stint,
    origin_focus: FocusSpan,
    counted_at: DateTime<Utc>,
    landed_on: String,
    landed_at: DateTime<Utc>,
}

/// Classifies foreground transitions into context switches and detects
/// sustained focus.
///
/// A change A→B counts the moment it happens if A held focus for at least
/// `min_dwell`. If B is left again before `min_dwell`, leaving B never counts,
/// and when focus returns to A the A→B switch is retracted and A's focus span
/// resumes as if B never happened.
#[derive(Debug, Clone)]
pub struct FocusAnalyzer {
    config: AnalyzerConfig,
    current: Option<Stint>,
    focus: Option<FocusSpan>,
    last_switch: Option<CountedSwitch>,
    last_seen: Option<DateTime<Utc>>,
}

impl FocusAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            current: None,
            focus: None,
            last_switch: None,
            last_seen: None,
        }
    }

    /// Feeds one foreground event. Events older than the last one seen are
    /// superseded and ignored.
    pub fn observe(&mut self, event: &ForegroundEvent) -> Vec<FocusSignal> {
        let mut signals = Vec::new();
        if self.last_seen.is_some_and(|seen| event.timestamp < seen) {
            return signals;
        }
        let at = event.timestamp;
        self.last_seen = Some(at);
        let Some(current) = self.current.clone() else {
            self.land_on(&event.bundle_id, at);
            self.check_focus(at, &mut signals);
            return signals;
        };

        if current.bundle_id == event.bundle_id {
            self.check_focus(at, &mut signals);
            return signals;
        }

        // The span on the app being left may have crossed the threshold
        // before this event arrived.
        self.check_focus(at, &mut signals);

        if at - current.since >= self.config.min_dwell() {
            signals.push(FocusSignal::ContextSwitch {
                from: current.bundle_id.clone(),
                to: event.bundle_id.clone(),
                at,
            });
            self.last_switch = self.focus.clone().map(|origin_focus| CountedSwitch {
                origin: current,
                origin_focus,
                counted_at: at,
                landed_on: event.bundle_id.clone(),
                landed_at: at,
            });
            self.land_on(&event.bundle_id, at);
            return signals;
        }

        match self.last_switch.take() {
            Some(switch)
                if switch.landed_on == current.bundle_id && switch.landed_at == current.since =>
            {
                if switch.origin.bundle_id == event.bundle_id {
                    signals.push(FocusSignal::SwitchRetracted {
                        at: switch.counted_at,
                    });
                    self.current = Some(switch.origin);
                    self.focus = Some(switch.origin_focus);
                    self.check_focus(at, &mut signals);
                } else {
                    // Flicker onward to a third app: the counted switch now
                    // effectively points there.
                    self.last_switch = Some(CountedSwitch {
                        landed_on: event.bundle_id.clone(),
                        landed_at: at,
                        ..switch
                    });
                    self.land_on(&event.bundle_id, at);
                }
            }
            _ => self.land_on(&event.bundle_id, at),
        }

        signals
    }

    /// Periodic check so a focus session is detected without waiting for the
    /// next foreground event.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<FocusSignal> {
        let mut signals = Vec::new();
        self.check_focus(now, &mut signals);
        signals
    }

    /// Ends the current stint, e.g. when tracking stops.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<FocusSignal> {
        let signals = self.tick(now);
        self.current = None;
        self.focus = None;
        self.last_switch = None;
        self.last_seen = None;
        signals
    }

    pub fn current_bundle(&self) -> Option<&str> {
        self.current.as_ref().map(|stint| stint.bundle_id.as_str())
    }

    fn land_on(&mut self, bundle_id: &str, at: DateTime<Utc>) {
        self.current = Some(Stint {
            bundle_id: bundle_id.to_string(),
            since: at,
        });
        self.focus = Some(FocusSpan {
            bundle_id: bundle_id.to_string(),
            since: at,
            counted: false,
        });
    }

    fn check_focus(&mut self, now: DateTime<Utc>, signals: &mut Vec<FocusSignal>) {
        let threshold = self.config.focus_threshold();
        if let Some(span) = self.focus.as_mut() {
            if !span.counted && now - span.since >= threshold {
                span.counted = true;
                signals.push(FocusSignal::FocusSessionReached {
                    bundle_id: span.bundle_id.clone(),
                    since: span.since,
                    at: span.since + threshold,
                });
            }
        }
    }
}
