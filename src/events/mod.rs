//! Ground magnetometer event segmentation.

use crate::domain::{NzMagEvent, Sample};

/// Split a rate-of-change series into volatility events.
///
/// An event opens on the first |rate| >= `threshold`, extends while the
/// series stays volatile and closes only after `cooldown_ms` of quiet since
/// its last volatile sample, so short dips do not fragment a burst. Events
/// come out non-overlapping and in time order.
pub fn segment_events(rate: &[Sample], threshold: f64, cooldown_ms: i64) -> Vec<NzMagEvent> {
    let mut events = Vec::new();
    let mut active: Option<NzMagEvent> = None;

    for point in rate {
        let magnitude = point.value.abs();
        let volatile = magnitude >= threshold;

        active = match active.take() {
            None if volatile => Some(NzMagEvent {
                start_ms: point.timestamp_ms,
                end_ms: point.timestamp_ms,
                max_delta: magnitude,
            }),
            None => None,
            Some(mut event) if volatile => {
                event.end_ms = point.timestamp_ms;
                event.max_delta = event.max_delta.max(magnitude);
                Some(event)
            }
            Some(event) => {
                if point.timestamp_ms - event.end_ms > cooldown_ms {
                    events.push(event);
                    None
                } else {
                    Some(event)
                }
            }
        };
    }

    events.extend(active);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MS_PER_MINUTE;

    const COOLDOWN: i64 = 10 * MS_PER_MINUTE;

    fn rate(points: &[(i64, f64)]) -> Vec<Sample> {
        points
            .iter()
            .map(|&(m, value)| Sample {
                timestamp_ms: m * MS_PER_MINUTE,
                value,
            })
            .collect()
    }

    fn quiet_minutes(from: i64, to: i64) -> Vec<(i64, f64)> {
        (from..to).map(|m| (m, 0.5)).collect()
    }

    #[test]
    fn test_isolated_spike() {
        let mut points = vec![(0, 1.0), (1, -7.5)];
        points.extend(quiet_minutes(2, 30));
        let events = segment_events(&rate(&points), 5.0, COOLDOWN);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_ms, events[0].end_ms);
        assert_eq!(events[0].start_ms, MS_PER_MINUTE);
        assert_eq!(events[0].max_delta, 7.5);
    }

    #[test]
    fn test_short_gap_merges() {
        let mut points = vec![(0, 6.0)];
        points.extend(quiet_minutes(1, 5));
        points.push((5, 9.0));
        points.extend(quiet_minutes(6, 30));
        let events = segment_events(&rate(&points), 5.0, COOLDOWN);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_ms, 0);
        assert_eq!(events[0].end_ms, 5 * MS_PER_MINUTE);
        assert_eq!(events[0].max_delta, 9.0);
    }

    #[test]
    fn test_long_gap_splits() {
        let mut points = vec![(0, 6.0)];
        points.extend(quiet_minutes(1, 20));
        points.push((20, -8.0));
        points.extend(quiet_minutes(21, 25));
        let events = segment_events(&rate(&points), 5.0, COOLDOWN);
        assert_eq!(events.len(), 2);
        assert!(events[0].end_ms < events[1].start_ms);
        assert_eq!(events[1].start_ms, 20 * MS_PER_MINUTE);
    }

    #[test]
    fn test_open_event_emitted_at_end() {
        let events = segment_events(&rate(&[(0, 1.0), (1, 5.0), (2, 6.0)]), 5.0, COOLDOWN);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].end_ms, 2 * MS_PER_MINUTE);
    }

    #[test]
    fn test_quiet_series_has_no_events() {
        assert!(segment_events(&rate(&quiet_minutes(0, 60)), 5.0, COOLDOWN).is_empty());
        assert!(segment_events(&[], 5.0, COOLDOWN).is_empty());
    }
}
