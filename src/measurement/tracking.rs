//! Maximum-power-point tracking.
//!
//! Tracking holds a device at the `Vpp` found by its forward sweep and
//! re-measures it at fixed intervals to observe drift. The result is a lazy
//! stream: nothing touches the instrument until it is polled, and every call to
//! [`track_max_power_point`] starts from scratch (fresh clock, fresh tick count).
//! Callers that need cooperative cancellation check their stop flag between
//! items; dropping the stream stops tracking.

use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::primitives::{
    apply_output, measure_open_circuit_and_short_circuit, performance_at, read_point,
};
use super::{MeasurementSettings, PerformanceRecord};
use crate::error::AppResult;
use crate::hardware::{Output, SourceMeter};

/// Smallest spacing between consecutive tick timestamps (s).
pub const MIN_TICK_SPACING: f64 = 1e-6;

/// Stream of tracking records, one per tick.
pub type TrackingStream<'a> = BoxStream<'a, AppResult<PerformanceRecord>>;

/// Tracking definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSpec {
    /// Operating voltage held between ticks (V)
    pub vpp: f64,
    /// Number of ticks, including the first one at t = 0
    pub num_points: u32,
    /// Sleep between ticks
    pub interval: Duration,
    /// Settle time after applying `vpp` before reading
    pub hold: Duration,
}

#[derive(Debug, Default)]
struct TrackerState {
    tick: u32,
    started: Option<Instant>,
    last_elapsed: Option<f64>,
    finished: bool,
}

impl TrackerState {
    /// Seconds since the first tick, kept strictly increasing even when the
    /// clock has not advanced between ticks.
    fn stamp(&mut self) -> f64 {
        let started = *self.started.get_or_insert_with(Instant::now);
        let measured = started.elapsed().as_secs_f64();
        let elapsed = match self.last_elapsed {
            Some(last) => measured.max(last + MIN_TICK_SPACING),
            None => measured,
        };
        self.last_elapsed = Some(elapsed);
        elapsed
    }
}

/// Track the maximum power point of the connected device.
///
/// Each tick re-measures Voc and Jsc, returns to `vpp`, waits `hold`, reads the
/// current and derives MPP, FF and efficiency from that operating point. The
/// first tick runs immediately; later ones after `interval`. `elapsed_seconds`
/// is measured from the first poll and strictly increases from tick to tick,
/// by at least [`MIN_TICK_SPACING`]. The stream ends after `num_points` records
/// or right after the first error.
pub fn track_max_power_point<'a>(
    smu: &'a dyn SourceMeter,
    spec: TrackingSpec,
    settings: MeasurementSettings,
) -> TrackingStream<'a> {
    stream::unfold(TrackerState::default(), move |mut state| async move {
        if state.finished || state.tick >= spec.num_points {
            return None;
        }
        if state.tick > 0 && !spec.interval.is_zero() {
            sleep(spec.interval).await;
        }
        let elapsed = state.stamp();
        state.tick += 1;

        debug!(
            tick = state.tick,
            of = spec.num_points,
            elapsed, "Tracking tick"
        );
        let result = tick(smu, &spec, &settings, elapsed).await;
        state.finished = result.is_err();
        Some((result, state))
    })
    .boxed()
}

async fn tick(
    smu: &dyn SourceMeter,
    spec: &TrackingSpec,
    settings: &MeasurementSettings,
    elapsed: f64,
) -> AppResult<PerformanceRecord> {
    let (voc, jsc) = measure_open_circuit_and_short_circuit(smu, settings).await?;

    apply_output(smu, Output::Voltage(spec.vpp)).await?;
    if !spec.hold.is_zero() {
        sleep(spec.hold).await;
    }
    let jpp = read_point(smu, settings).await?.current_density;

    let performance = performance_at(voc, jsc, spec.vpp, jpp, settings.power_in);
    Ok(PerformanceRecord::now(&performance, elapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;
    use crate::hardware::mock::MockSourceMeter;

    fn spec(num_points: u32, interval: Duration) -> TrackingSpec {
        TrackingSpec {
            vpp: 0.6,
            num_points,
            interval,
            hold: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_elapsed_strictly_increases() {
        let smu = MockSourceMeter::new();
        smu.on().await.unwrap();

        let records: Vec<_> =
            track_max_power_point(&smu, spec(3, Duration::ZERO), MeasurementSettings::default())
                .collect()
                .await;

        assert_eq!(records.len(), 3);
        let elapsed: Vec<f64> = records
            .iter()
            .map(|r| r.as_ref().unwrap().elapsed_seconds)
            .collect();
        assert_eq!(elapsed[0], 0.0);
        assert!(elapsed.windows(2).all(|w| w[0] < w[1]), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_instrument_still_advances_elapsed() {
        let smu = MockSourceMeter::new().with_latency(Duration::ZERO);
        smu.on().await.unwrap();

        let records: Vec<_> =
            track_max_power_point(&smu, spec(3, Duration::ZERO), MeasurementSettings::default())
                .collect()
                .await;

        let elapsed: Vec<f64> = records
            .iter()
            .map(|r| r.as_ref().unwrap().elapsed_seconds)
            .collect();
        assert_eq!(elapsed.len(), 3);
        assert_eq!(elapsed[0], 0.0);
        assert!(elapsed.windows(2).all(|w| w[0] < w[1]), "{elapsed:?}");
        assert!(elapsed[2] >= 2.0 * MIN_TICK_SPACING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_spaced_by_interval() {
        let smu = MockSourceMeter::new();
        smu.on().await.unwrap();

        let records: Vec<_> = track_max_power_point(
            &smu,
            spec(4, Duration::from_secs(2)),
            MeasurementSettings::default(),
        )
        .collect()
        .await;

        let elapsed: Vec<f64> = records
            .iter()
            .map(|r| r.as_ref().unwrap().elapsed_seconds)
            .collect();
        for (k, t) in elapsed.iter().enumerate() {
            assert!(*t >= 2.0 * k as f64, "tick {k} at {t}");
            assert!(*t < 2.0 * k as f64 + 0.5, "tick {k} at {t}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_holds_vpp_and_derives_performance() {
        let smu = MockSourceMeter::new();
        smu.on().await.unwrap();

        let settings = MeasurementSettings::new(1.0, 1.0, true);
        let mut stream = track_max_power_point(&smu, spec(1, Duration::ZERO), settings);
        let record = stream.next().await.unwrap().unwrap();
        assert!(stream.next().await.is_none());

        assert_eq!(record.vpp, 0.6);
        assert!(record.voc > 0.6);
        assert!(record.mpp > 0.0);
        assert!(record.fill_factor > 0.0 && record.fill_factor < 100.0);
        assert_eq!(smu.voltage_log().last(), Some(&0.6));
    }

    #[tokio::test]
    async fn test_lazy_until_polled() {
        let smu = MockSourceMeter::new();
        let stream =
            track_max_power_point(&smu, spec(5, Duration::ZERO), MeasurementSettings::default());
        drop(stream);
        assert_eq!(smu.read_count().await, 0);
        assert!(smu.voltage_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_after_error() {
        // Three reads per tick; the first tick fails on its last read.
        let smu = MockSourceMeter::new().failing_after(2);
        smu.on().await.unwrap();

        let records: Vec<_> =
            track_max_power_point(&smu, spec(5, Duration::ZERO), MeasurementSettings::default())
                .collect()
                .await;
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Err(DaqError::MeasurementRead(_))));
    }
}
