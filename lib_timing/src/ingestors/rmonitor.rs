//! # RMonitor Feed Parser
//!
//! Stateful parser for the line-oriented timing protocol scoreboard
//! vendors ship over TCP: one record per line, comma-separated, string
//! fields double-quoted, record kind in a leading `$TAG`.
//!
//! A malformed or short record is logged and skipped; one bad line never
//! aborts the stream.

use crate::ingestors::RaceContext;
use crate::leaderboard::Flag;
use crate::utils::{epoch_millis_to_utc, parse_clock};

pub struct RMonitorParser {
    ctx: RaceContext,
}

impl RMonitorParser {
    pub fn new(ctx: RaceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RaceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RaceContext {
        &mut self.ctx
    }

    /// Parses one provider record and applies it to the register. The
    /// `$RMHL` lap-highlight record additionally runs the lap-completion
    /// evaluation.
    pub fn handle_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        let fields = split_fields(line);

        match fields[0].as_str() {
            "$COMP" => self.handle_competitor(&fields),
            "$C" => self.handle_class(&fields),
            "$F" => self.handle_flag(&fields),
            "$G" => self.handle_position(&fields),
            "$H" => self.handle_fastest_lap(&fields),
            "$J" => self.handle_last_lap(&fields),
            "$RMLT" => self.handle_crossing(&fields),
            "$RMHL" => self.handle_lap_highlight(&fields),
            tag => log::debug!("ignoring record tag {}", tag),
        }
    }

    // $COMP,"181",_,_,classId,"Jane","Doe"
    fn handle_competitor(&mut self, fields: &[String]) {
        if fields.len() < 7 {
            log::warn!("short $COMP record: {:?}", fields);
            return;
        }
        let car = &fields[1];
        let class_id = non_empty(&fields[4]);
        let name = format!("{} {}", fields[5], fields[6]);
        self.ctx
            .order_mut()
            .add_entrant(car, name.trim(), class_id);
    }

    // $C,classId,"ClassName"
    fn handle_class(&mut self, fields: &[String]) {
        if fields.len() < 3 {
            log::warn!("short $C record: {:?}", fields);
            return;
        }
        self.ctx.order_mut().add_class(&fields[1], &fields[2]);
    }

    // $F,lapsToGo,timeToGo,timeOfDay,raceTime,flag
    fn handle_flag(&mut self, fields: &[String]) {
        if fields.len() < 6 {
            log::warn!("short $F record: {:?}", fields);
            return;
        }
        self.ctx.apply_flag(Flag::parse(&fields[5]));
    }

    // $G,position,carNumber,lapsCompleted
    fn handle_position(&mut self, fields: &[String]) {
        if fields.len() < 4 {
            log::warn!("short $G record: {:?}", fields);
            return;
        }
        let (Ok(position), Ok(laps)) = (fields[1].parse::<u32>(), fields[3].parse::<i32>())
        else {
            log::warn!("unparseable $G record: {:?}", fields);
            return;
        };
        self.ctx
            .order_mut()
            .update_position(&fields[2], position, laps, None);
    }

    // $H,_,carNumber,lapNumber,lapTime
    fn handle_fastest_lap(&mut self, fields: &[String]) {
        if fields.len() < 5 {
            log::warn!("short $H record: {:?}", fields);
            return;
        }
        let (Ok(lap_no), Some(secs)) = (fields[3].parse::<u32>(), parse_clock(&fields[4])) else {
            log::warn!("unparseable $H record: {:?}", fields);
            return;
        };
        self.ctx
            .order_mut()
            .update_fastest_lap(&fields[2], lap_no, secs);
    }

    // $J,carNumber,lapTime
    fn handle_last_lap(&mut self, fields: &[String]) {
        if fields.len() < 3 {
            log::warn!("short $J record: {:?}", fields);
            return;
        }
        let Some(secs) = parse_clock(&fields[2]) else {
            log::warn!("unparseable $J record: {:?}", fields);
            return;
        };
        self.ctx.order_mut().update_last_lap(&fields[1], secs);
    }

    // $RMLT,carNumber,epochMillis
    fn handle_crossing(&mut self, fields: &[String]) {
        if fields.len() < 3 {
            log::warn!("short $RMLT record: {:?}", fields);
            return;
        }
        let timestamp = fields[2].parse::<i64>().ok().and_then(epoch_millis_to_utc);
        let Some(timestamp) = timestamp else {
            log::warn!("unparseable $RMLT record: {:?}", fields);
            return;
        };
        self.ctx.order_mut().update_crossing(&fields[1], timestamp);
    }

    // $RMHL,carNumber,laps,position,lapTime,flag
    fn handle_lap_highlight(&mut self, fields: &[String]) {
        if fields.len() < 6 {
            log::warn!("short $RMHL record: {:?}", fields);
            return;
        }
        let car = fields[1].clone();
        let (Ok(laps), Ok(position)) = (fields[2].parse::<i32>(), fields[3].parse::<u32>()) else {
            log::warn!("unparseable $RMHL record: {:?}", fields);
            return;
        };

        self.ctx.order_mut().update_position(&car, position, laps, None);
        if let Some(secs) = parse_clock(&fields[4]) {
            self.ctx.order_mut().update_last_lap(&car, secs);
        }
        self.ctx.apply_flag(Flag::parse(&fields[5]));
        self.ctx.lap_completed(&car);
    }
}

/// Splits a record into fields: comma-separated, with double quotes
/// wrapping (and stripped from) string fields. The wire format never
/// escapes quotes, so none of that here.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn non_empty(field: &str) -> Option<&str> {
    if field.is_empty() {
        None
    } else {
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::EventBus;
    use crate::core::events::{EventKind, RaceEvent};
    use std::sync::Arc;

    fn parser_with_targets(cars: &[&str]) -> (Arc<EventBus>, RMonitorParser) {
        let bus = Arc::new(EventBus::new());
        let ctx = RaceContext::new(
            "vir",
            Arc::clone(&bus),
            cars.iter().map(|c| c.to_string()),
        );
        (bus, RMonitorParser::new(ctx))
    }

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(
            split_fields(r#"$COMP,"181",,,A,"Jane","Doe""#),
            vec!["$COMP", "181", "", "", "A", "Jane", "Doe"]
        );
        assert_eq!(
            split_fields(r#"$J,"12","00:01:02.500""#),
            vec!["$J", "12", "00:01:02.500"]
        );
    }

    #[test]
    fn registers_competitors_and_classes() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_line(r#"$COMP,"181",,,A,"Jane","Doe""#);
        parser.handle_line(r#"$C,A,"ClassA""#);

        let entrant = parser.context().order().entrant("181").unwrap();
        assert_eq!(entrant.name, "Jane Doe");
        assert_eq!(entrant.class_id.as_deref(), Some("A"));
        assert_eq!(parser.context().order().class_name("A"), Some("ClassA"));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_line(r#"$COMP,"181""#); // short
        parser.handle_line(r#"$G,first,"181",many"#); // unparseable numbers
        parser.handle_line("complete garbage");
        parser.handle_line("");
        assert!(parser.context().order().entrant("181").is_none());
    }

    #[test]
    fn flag_events_only_fire_on_change() {
        let (bus, mut parser) = parser_with_targets(&[]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::RaceStatusChanged], None);

        parser.handle_line(r#"$F,9999,"00:00:00","07:00:00","00:00:00","Green""#);
        parser.handle_line(r#"$F,9999,"00:00:00","07:05:00","00:05:00","Green""#);
        parser.handle_line(r#"$F,9999,"00:00:00","07:10:00","00:10:00","Yellow""#);

        match rx.try_recv().unwrap().as_ref() {
            RaceEvent::RaceStatusChanged { flag, .. } => {
                assert_eq!(*flag, crate::leaderboard::Flag::Green)
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.try_recv().unwrap().as_ref() {
            RaceEvent::RaceStatusChanged { flag, .. } => {
                assert_eq!(*flag, crate::leaderboard::Flag::Yellow)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "duplicate flag must not re-emit");
    }

    #[test]
    fn lap_and_timing_records_update_the_register() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_line(r#"$COMP,"181",,,A,"Jane","Doe""#);
        parser.handle_line(r#"$G,2,"181",7"#);
        parser.handle_line(r#"$J,"181","00:01:42.500""#);
        parser.handle_line(r#"$H,1,"181",5,"00:01:39.900""#);
        parser.handle_line(r#"$RMLT,"181",1700000000000"#);

        let entrant = parser.context().order().entrant("181").unwrap();
        assert_eq!(entrant.laps, 7);
        assert!((entrant.last_lap_secs - 102.5).abs() < 1e-9);
        assert_eq!(entrant.fastest_lap_no, 5);
        assert!((entrant.fastest_lap_secs - 99.9).abs() < 1e-9);
        assert_eq!(
            entrant.last_crossing.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn negative_penalty_laps_parse() {
        let (_bus, mut parser) = parser_with_targets(&[]);
        parser.handle_line(r#"$COMP,"17",,,A,"P","D""#);
        parser.handle_line(r#"$G,10,"17",-2"#);
        assert_eq!(parser.context().order().entrant("17").unwrap().laps, -2);
    }

    #[test]
    fn lap_highlight_for_interest_car_emits_one_event() {
        // End-to-end over the wire shapes: register, class, a position
        // update, then the lap highlight that triggers evaluation.
        let (bus, mut parser) = parser_with_targets(&["181"]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::LapCompleted], None);

        parser.handle_line(r#"$COMP,"181",,,A,"Jane","Doe""#);
        parser.handle_line(r#"$C,A,"ClassA""#);
        parser.handle_line(r#"$G,1,"181",3"#);
        parser.handle_line(r#"$RMHL,"181","4","1","01:02.500","green",0,0"#);

        match rx.try_recv().unwrap().as_ref() {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.car, "181");
                assert_eq!(lap.laps, 4);
                assert_eq!(lap.position, 1);
                assert_eq!(lap.gap, "-", "leader has no comparison baseline");
                assert!((lap.last_lap_secs - 62.5).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "exactly one lap event");
    }

    #[test]
    fn lap_highlight_for_unwatched_car_is_silent() {
        let (bus, mut parser) = parser_with_targets(&["999"]);
        let (_id, mut rx) = bus.subscribe(&[EventKind::LapCompleted], None);

        parser.handle_line(r#"$COMP,"181",,,A,"Jane","Doe""#);
        parser.handle_line(r#"$RMHL,"181","4","1","01:02.500","green",0,0"#);
        assert!(rx.try_recv().is_err());
    }
}
