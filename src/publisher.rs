use crate::device_model::CHANNELS;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, MutexGuard};
use polars::prelude::*;
use std::sync::Arc;

const TIME_COLUMN_NAME: &str = "time";
const ROW_INDEX_COLUMN_NAME: &str = "row_index";

fn channel_column_name(channel: usize) -> String {
    format!("ch{}", channel + 1)
}

/// Calibrated waveforms of the most recent cycle
#[derive(Debug, Default)]
pub struct SampleBuffers {
    channels: [Vec<f64>; CHANNELS],
    sample_rate: f64,
    cycle: u64,
}

impl SampleBuffers {
    /// Samples of `channel` in volts, empty for an unknown channel
    pub fn channel(&self, channel: usize) -> &[f64] {
        self.channels.get(channel).map_or(&[][..], Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn lengths(&self) -> [usize; CHANNELS] {
        std::array::from_fn(|channel| self.channels[channel].len())
    }

    /// Sample rate in S/s
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of the cycle that produced these samples, 0 before the first one
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Sized buffer for `channel`, reallocated only when the length changes
    pub(crate) fn prepare(&mut self, channel: usize, length: usize) -> &mut [f64] {
        let samples = &mut self.channels[channel];
        if samples.len() != length {
            *samples = vec![0.0; length];
        }
        samples
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            cycle: self.cycle,
            sample_rate: self.sample_rate,
            channels: self.channels.to_vec(),
        }
    }
}

/// The sample buffer lock.
///
/// The acquisition loop holds it for a whole reconstruction pass. Readers
/// hold the guard returned by [`SharedSamples::lock`] for as long as they
/// read; dropping it releases the lock. Holding it for long stalls acquisition.
#[derive(Debug, Clone, Default)]
pub struct SharedSamples(Arc<Mutex<SampleBuffers>>);

impl SharedSamples {
    pub fn lock(&self) -> MutexGuard<'_, SampleBuffers> {
        self.0.lock()
    }

    /// Owned copy of the current samples, lock released on return
    pub fn snapshot(&self) -> Frame {
        self.0.lock().to_frame()
    }
}

#[derive(Debug, Clone)]
pub enum ScopeEvent {
    /// A new cycle has been published into `samples`
    SamplesAvailable {
        cycle: u64,
        lengths: [usize; CHANNELS],
        sample_rate: f64,
        samples: SharedSamples,
    },
    Status(String),
    /// The device is gone, no more samples will follow
    Disconnected,
}

/// Hands finished cycles to every subscriber
#[derive(Debug)]
pub struct Publisher {
    samples: SharedSamples,
    subscribers: Mutex<Vec<Sender<ScopeEvent>>>,
    queue_depth: usize,
}

impl Publisher {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            samples: SharedSamples::default(),
            subscribers: Mutex::new(Vec::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn samples(&self) -> SharedSamples {
        self.samples.clone()
    }

    /// Events for a new consumer. A consumer that falls `queue_depth` events
    /// behind misses events until it catches up.
    pub fn subscribe(&self) -> Receiver<ScopeEvent> {
        let (sender, receiver) = bounded(self.queue_depth);
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Stamp the finished buffers, release the lock and notify subscribers
    pub fn publish(&self, mut buffers: MutexGuard<'_, SampleBuffers>, sample_rate: f64) {
        buffers.sample_rate = sample_rate;
        buffers.cycle += 1;
        let cycle = buffers.cycle;
        let lengths = buffers.lengths();
        drop(buffers);

        self.notify(&ScopeEvent::SamplesAvailable {
            cycle,
            lengths,
            sample_rate,
            samples: self.samples.clone(),
        });
    }

    pub fn notify(&self, event: &ScopeEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::trace!("Subscriber queue full, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Owned copy of one published cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub cycle: u64,
    pub sample_rate: f64,
    pub channels: Vec<Vec<f64>>,
}

impl Frame {
    /// `time` column in seconds followed by one column per channel, in volts
    pub fn to_lazy_frame(&self) -> Result<LazyFrame, PolarsError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("to_lazy_frame"), 0));

        let height = self.channels.iter().map(Vec::len).min().unwrap_or(0);
        let columns: Vec<Column> = self
            .channels
            .iter()
            .enumerate()
            .map(|(channel, samples)| {
                Series::new(channel_column_name(channel).into(), &samples[..height]).into()
            })
            .collect();

        let selection: Vec<Expr> = std::iter::once(col(TIME_COLUMN_NAME))
            .chain((0..self.channels.len()).map(|channel| col(channel_column_name(channel))))
            .collect();

        Ok(DataFrame::new(columns)?
            .lazy()
            .with_row_index(ROW_INDEX_COLUMN_NAME, Some(0))
            .with_columns([(col(ROW_INDEX_COLUMN_NAME).cast(DataType::Float64)
                * lit(1.0 / self.sample_rate))
            .alias(TIME_COLUMN_NAME)])
            .select(selection))
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), PolarsError> {
        let mut df = self.to_lazy_frame()?.collect()?;
        CsvWriter::new(writer).include_header(true).finish(&mut df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(publisher: &Publisher, values: [&[f64]; CHANNELS], rate: f64) {
        let samples = publisher.samples();
        let mut buffers = samples.lock();
        for (channel, values) in values.iter().enumerate() {
            buffers.prepare(channel, values.len()).copy_from_slice(values);
        }
        publisher.publish(buffers, rate);
    }

    #[test]
    fn test_publish_notifies_subscribers() {
        let publisher = Publisher::new(4);
        let events = publisher.subscribe();

        fill(&publisher, [&[1.0, 2.0], &[3.0, 4.0]], 240_000.0);

        match events.try_recv() {
            Ok(ScopeEvent::SamplesAvailable {
                cycle,
                lengths,
                sample_rate,
                samples,
            }) => {
                assert_eq!(cycle, 1);
                assert_eq!(lengths, [2, 2]);
                assert!((sample_rate - 240_000.0).abs() < f64::EPSILON);
                let buffers = samples.lock();
                assert_eq!(buffers.channel(1), &[3.0, 4.0]);
                assert_eq!(buffers.cycle(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_drops_events() {
        let publisher = Publisher::new(1);
        let events = publisher.subscribe();

        fill(&publisher, [&[1.0], &[1.0]], 1.0);
        fill(&publisher, [&[2.0], &[2.0]], 1.0);

        assert_eq!(events.len(), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.samples().lock().cycle(), 2);
    }

    #[test]
    fn test_dropped_receiver_unsubscribes() {
        let publisher = Publisher::new(4);
        drop(publisher.subscribe());
        let _kept = publisher.subscribe();

        publisher.notify(&ScopeEvent::Status("hello".to_string()));

        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let buffers = SampleBuffers::default();
        assert!(buffers.channel(7).is_empty());
    }

    #[test]
    fn test_frame_to_lazy_frame() {
        let frame = Frame {
            cycle: 3,
            sample_rate: 2.0,
            channels: vec![vec![0.1, 0.2, 0.3], vec![1.0, 2.0]],
        };

        let df = frame.to_lazy_frame().unwrap().collect().unwrap();

        assert_eq!(df.height(), 2);
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["time", "ch1", "ch2"]);
        let time: Vec<f64> = df.column("time").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(time, [0.0, 0.5]);
    }

    #[test]
    fn test_frame_write_csv() {
        let publisher = Publisher::new(1);
        fill(&publisher, [&[0.5, -0.5], &[1.5, -1.5]], 4.0);

        let mut out = Vec::new();
        publisher.samples().snapshot().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("time,ch1,ch2"));
        assert_eq!(text.lines().count(), 3);
    }
}
