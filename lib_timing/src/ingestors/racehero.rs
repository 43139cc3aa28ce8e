//! # RaceHero Feed Parser
//!
//! Handler for the structured-payload provider: each poll returns the
//! session roster, the accumulated passing list, and the latest flag.
//! Passings resolve through their session to a car number and then apply
//! the same register operations and lap-completion evaluation as the line
//! protocol.
//!
//! Because the API is polled and re-sends known passings, the parser
//! remembers the highest lap seen per car and only treats an advanced lap
//! count as a fresh crossing.

use std::collections::HashMap;

use serde::Deserialize;

use crate::ingestors::RaceContext;
use crate::leaderboard::Flag;
use crate::utils::{epoch_millis_to_utc, parse_clock};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RaceHeroPayload {
    pub sessions: Vec<RaceHeroSession>,
    pub passings: Vec<RaceHeroPassing>,
    pub latest_flag: Option<String>,
}

/// One entry of the session roster: the provider's session id mapped to
/// the car it represents.
#[derive(Debug, Clone, Deserialize)]
pub struct RaceHeroSession {
    pub id: i64,
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
}

/// One timing-line passing, keyed by session id.
#[derive(Debug, Clone, Deserialize)]
pub struct RaceHeroPassing {
    pub session_id: i64,
    #[serde(default)]
    pub position_in_run: Option<u32>,
    #[serde(default)]
    pub latest_lap_number: Option<i32>,
    #[serde(default)]
    pub best_lap_number: Option<u32>,
    #[serde(default)]
    pub best_lap_time: Option<String>,
    #[serde(default)]
    pub last_lap_time: Option<String>,
    /// Crossing timestamp, epoch milliseconds.
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

pub struct RaceHeroParser {
    ctx: RaceContext,
    /// Session id → car number, accumulated across payloads.
    sessions: HashMap<i64, String>,
    /// Highest lap count already evaluated per car.
    seen_laps: HashMap<String, i32>,
}

impl RaceHeroParser {
    pub fn new(ctx: RaceContext) -> Self {
        Self {
            ctx,
            sessions: HashMap::new(),
            seen_laps: HashMap::new(),
        }
    }

    pub fn context(&self) -> &RaceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RaceContext {
        &mut self.ctx
    }

    /// Applies one polled payload: roster first, then flag, then passings.
    pub fn handle_payload(&mut self, payload: &RaceHeroPayload) {
        for session in &payload.sessions {
            self.register_session(session);
        }

        if let Some(flag) = &payload.latest_flag {
            self.ctx.apply_flag(Flag::parse(flag));
        }

        for passing in &payload.passings {
            self.apply_passing(passing);
        }
    }

    fn register_session(&mut self, session: &RaceHeroSession) {
        let name = session.name.as_deref().unwrap_or(&session.number);
        self.ctx
            .order_mut()
            .add_entrant(&session.number, name, session.class_name.as_deref());
        if let Some(class) = &session.class_name {
            self.ctx.order_mut().add_class(class, class);
        }
        self.sessions.insert(session.id, session.number.clone());
    }

    fn apply_passing(&mut self, passing: &RaceHeroPassing) {
        let Some(car) = self.sessions.get(&passing.session_id).cloned() else {
            log::debug!(
                "passing references unknown session {}, skipping",
                passing.session_id
            );
            return;
        };

        let Some(laps) = passing.latest_lap_number else {
            return;
        };
        let timestamp = passing.timestamp_ms.and_then(epoch_millis_to_utc);
        let position = passing.position_in_run.unwrap_or(0);
        self.ctx
            .order_mut()
            .update_position(&car, position, laps, timestamp);

        if let Some(secs) = passing.last_lap_time.as_deref().and_then(parse_clock) {
            self.ctx.order_mut().update_last_lap(&car, secs);
        }
        if let (Some(lap_no), Some(secs)) = (
            passing.best_lap_number,
            passing.best_lap_time.as_deref().and_then(parse_clock),
        ) {
            self.ctx.order_mut().update_fastest_lap(&car, lap_no, secs);
        }

        // The payload re-ships history every poll; only an advanced lap
        // count is a fresh crossing worth evaluating.
        let already_seen = self
            .seen_laps
            .get(&car)
            .is_some_and(|&seen| seen >= laps);
        if already_seen {
            return;
        }
        self.seen_laps.insert(car.clone(), laps);
        self.ctx.lap_completed(&car);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::EventBus;
    use crate::core::events::{EventKind, RaceEvent};
    use std::sync::Arc;

    fn payload(json: serde_json::Value) -> RaceHeroPayload {
        serde_json::from_value(json).unwrap()
    }

    fn parser_with_targets(cars: &[&str]) -> (Arc<EventBus>, RaceHeroParser) {
        let bus = Arc::new(EventBus::new());
        let ctx = RaceContext::new(
            "road-atlanta",
            Arc::clone(&bus),
            cars.iter().map(|c| c.to_string()),
        );
        (bus, RaceHeroParser::new(ctx))
    }

    #[test]
    fn passings_resolve_through_sessions() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_payload(&payload(serde_json::json!({
            "sessions": [
                { "id": 11, "number": "42", "name": "Team A", "class_name": "GT3" }
            ],
            "passings": [
                {
                    "session_id": 11,
                    "position_in_run": 1,
                    "latest_lap_number": 9,
                    "best_lap_number": 4,
                    "best_lap_time": "00:01:39.900",
                    "last_lap_time": "00:01:42.500",
                    "timestamp_ms": 1700000000000i64
                }
            ],
            "latest_flag": "green flag"
        })));

        let order = parser.context().order();
        let entrant = order.entrant("42").unwrap();
        assert_eq!(entrant.name, "Team A");
        assert_eq!(entrant.laps, 9);
        assert!((entrant.last_lap_secs - 102.5).abs() < 1e-9);
        assert_eq!(entrant.fastest_lap_no, 4);
        assert_eq!(order.flag(), Flag::Green);
    }

    #[test]
    fn unknown_session_passing_is_tolerated() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_payload(&payload(serde_json::json!({
            "passings": [ { "session_id": 99, "latest_lap_number": 3 } ]
        })));
        assert!(parser.context().order().entrant("99").is_none());
    }

    #[test]
    fn repeated_payloads_do_not_reevaluate_old_laps() {
        let (bus, mut parser) = parser_with_targets(&["42"]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::LapCompleted], None);

        let body = serde_json::json!({
            "sessions": [ { "id": 11, "number": "42" } ],
            "passings": [
                { "session_id": 11, "latest_lap_number": 5, "timestamp_ms": 1700000000000i64 }
            ]
        });
        parser.handle_payload(&payload(body.clone()));
        parser.handle_payload(&payload(body));

        match rx.try_recv().unwrap().as_ref() {
            RaceEvent::LapCompleted(lap) => assert_eq!(lap.laps, 5),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "re-polled passing must stay quiet");
    }

    #[test]
    fn advanced_lap_count_is_a_fresh_crossing() {
        let (bus, mut parser) = parser_with_targets(&["42"]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::LapCompleted], None);

        parser.handle_payload(&payload(serde_json::json!({
            "sessions": [ { "id": 11, "number": "42" } ],
            "passings": [ { "session_id": 11, "latest_lap_number": 5 } ]
        })));
        parser.handle_payload(&payload(serde_json::json!({
            "passings": [ { "session_id": 11, "latest_lap_number": 6 } ]
        })));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        match (first.as_ref(), second.as_ref()) {
            (RaceEvent::LapCompleted(a), RaceEvent::LapCompleted(b)) => {
                assert_eq!(a.laps, 5);
                assert_eq!(b.laps, 6);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn flag_variants_normalize() {
        let (bus, mut parser) = parser_with_targets(&[]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::RaceStatusChanged], None);

        parser.handle_payload(&payload(serde_json::json!({ "latest_flag": "yellow flag" })));
        parser.handle_payload(&payload(serde_json::json!({ "latest_flag": "yellow" })));

        match rx.try_recv().unwrap().as_ref() {
            RaceEvent::RaceStatusChanged { flag, .. } => assert_eq!(*flag, Flag::Yellow),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(
            rx.try_recv().is_err(),
            "both variants are the same flag, one event"
        );
    }
}
