//! Event stream: every session becomes three signed state changes.

use chrono::NaiveDateTime;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Plug-in: one more port occupied, load rises by the session's power.
    Start,
    /// Charging stops: load falls, the car still holds the port.
    ChargeEnd,
    /// Plug-out: port released.
    End,
}

/// A point-in-time delta to one station's occupancy and load.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub timestamp: NaiveDateTime,
    pub station: String,
    pub kind: EventKind,
    pub occupancy_delta: i64,
    pub load_delta_kw: f64,
}

impl StateEvent {
    fn new(session: &Session, kind: EventKind) -> Self {
        let (timestamp, occupancy_delta, load_delta_kw) = match kind {
            EventKind::Start => (session.start, 1, session.avg_power_kw),
            EventKind::ChargeEnd => (session.charging_end, 0, -session.avg_power_kw),
            EventKind::End => (session.end, -1, 0.0),
        };
        Self {
            timestamp,
            station: session.station.clone(),
            kind,
            occupancy_delta,
            load_delta_kw,
        }
    }
}

/// Builds the chronologically ordered event stream across all stations.
///
/// Events are emitted as all starts, then all charge-ends, then all ends, and
/// stably sorted by timestamp. Ties therefore resolve start before charge-end
/// before end, and by session order within a kind.
pub fn build_event_stream(sessions: &[Session]) -> Vec<StateEvent> {
    let mut events: Vec<StateEvent> = [EventKind::Start, EventKind::ChargeEnd, EventKind::End]
        .into_iter()
        .flat_map(|kind| sessions.iter().map(move |s| StateEvent::new(s, kind)))
        .collect();

    // `sort_by_key` is stable.
    events.sort_by_key(|e| e.timestamp);
    events
}
