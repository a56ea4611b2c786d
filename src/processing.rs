//! Block based signal processing on the real time side of the hot-swap chain.
//!
//! A [`Plugin`] never sees a half built configuration: its
//! [`BlockProcessor`] polls the chain exactly once per block and passes the
//! adopted configuration into `process`.  New configurations are produced on
//! the control side by a [`ParameterHandler`] such as [`GainParameters`].
use crate::{
    common::box_error::BoxError,
    control::ParameterHandler,
    hot_swap::{ConfigReader, ConfigWriter, HotSwapError},
    reactor::{AsyncNotify, EventWatcher, SignaledEvents, TimeoutEvent},
};
use log::{debug, info, trace, warn};
use simple_error::bail;
use std::{
    f32::consts::PI,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilder, ThreadPriority};

pub trait Plugin: Send {
    type Config: Send + Sync;

    fn process(&mut self, cfg: &Self::Config, input: &[f32], output: &mut [f32]);
}

/// Runs one plugin with whatever configuration is current at each block
pub struct BlockProcessor<P: Plugin> {
    plugin: P,
    reader: ConfigReader<P::Config>,
    blocks: u64,
}

impl<P: Plugin> BlockProcessor<P> {
    pub fn new(plugin: P, reader: ConfigReader<P::Config>) -> BlockProcessor<P> {
        BlockProcessor {
            plugin,
            reader,
            blocks: 0,
        }
    }

    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), HotSwapError> {
        let cfg = self.reader.poll_config()?;
        self.plugin.process(cfg, input, output);
        self.blocks += 1;
        Ok(())
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn reader(&self) -> &ConfigReader<P::Config> {
        &self.reader
    }
}

/// One pole low pass, used to ramp gain changes instead of stepping them
pub struct SmoothingFilter {
    coef: f32,
    last_output: f32,
}

impl SmoothingFilter {
    pub fn build(time_const: f32, sample_rate: f32, initial: f32) -> SmoothingFilter {
        SmoothingFilter {
            coef: 1.0 - (-1.0 / (time_const * sample_rate)).exp(),
            last_output: initial,
        }
    }

    pub fn get(&mut self, input: f32) -> f32 {
        self.last_output = input * self.coef + (1.0 - self.coef) * self.last_output;
        self.last_output
    }

    pub fn get_last_output(&self) -> f32 {
        self.last_output
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GainConfig {
    pub db: f32,
    pub linear: f32,
}

impl GainConfig {
    pub fn from_db(db: f32) -> GainConfig {
        GainConfig {
            db,
            linear: db_to_linear(db),
        }
    }
}

pub struct GainPlugin {
    smoother: SmoothingFilter,
    peak: f32,
}

impl GainPlugin {
    pub fn new(sample_rate: f32) -> GainPlugin {
        GainPlugin {
            // 10 ms ramp
            smoother: SmoothingFilter::build(0.01, sample_rate, 1.0),
            peak: 0.0,
        }
    }

    /// Peak absolute output of the last block
    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn current_gain(&self) -> f32 {
        self.smoother.get_last_output()
    }
}

impl Plugin for GainPlugin {
    type Config = GainConfig;

    fn process(&mut self, cfg: &GainConfig, input: &[f32], output: &mut [f32]) {
        self.peak = 0.0;
        for (out, samp) in output.iter_mut().zip(input) {
            *out = samp * self.smoother.get(cfg.linear);
            self.peak = self.peak.max(out.abs());
        }
    }
}

pub const GAIN_MIN_DB: f32 = -80.0;
pub const GAIN_MAX_DB: f32 = 20.0;

/// Control side of [`GainPlugin`]: `db=<value>` and `db?`
pub struct GainParameters {
    db: f32,
    writer: ConfigWriter<GainConfig>,
}

impl GainParameters {
    /// Publishes the initial configuration right away
    pub fn new(mut writer: ConfigWriter<GainConfig>, db: f32) -> GainParameters {
        writer.push_config(GainConfig::from_db(db));
        GainParameters { db, writer }
    }

    pub fn db(&self) -> f32 {
        self.db
    }

    pub fn writer(&self) -> &ConfigWriter<GainConfig> {
        &self.writer
    }
}

impl ParameterHandler for GainParameters {
    fn parse(&mut self, request: &str) -> Result<String, BoxError> {
        match request.trim() {
            "db?" => return Ok(self.db.to_string()),
            r => {
                if let Some(value) = r.strip_prefix("db").and_then(|v| v.trim_start().strip_prefix('=')) {
                    let db: f32 = value.trim().parse()?;
                    if !(GAIN_MIN_DB..=GAIN_MAX_DB).contains(&db) {
                        bail!(
                            "gain {} dB out of range [{}, {}]",
                            db,
                            GAIN_MIN_DB,
                            GAIN_MAX_DB
                        );
                    }
                    debug!("new gain {} dB", db);
                    self.writer.push_config(GainConfig::from_db(db));
                    self.db = db;
                    return Ok(String::new());
                }
            }
        }
        bail!("unknown gain parameter \"{}\"", request)
    }

    fn variables(&self) -> Vec<(String, String)> {
        vec![("db".to_string(), self.db.to_string())]
    }
}

/// Stand-in for an audio backend: feeds a test tone through the processor
/// once per block period on a max priority thread until `stop` is set.
///
/// The thread returns the number of processed blocks.
pub fn run_block_clock<P: Plugin + 'static>(
    mut processor: BlockProcessor<P>,
    fragsize: usize,
    srate: u32,
    stop: Arc<AsyncNotify>,
) -> Result<JoinHandle<Result<u64, BoxError>>, BoxError> {
    if fragsize == 0 || srate == 0 {
        bail!("block clock needs a nonzero fragment size and sample rate");
    }
    let period = Duration::from_secs_f64(fragsize as f64 / srate as f64);
    let handle = ThreadBuilder::default()
        .name("block-clock".to_string())
        .priority(ThreadPriority::Max)
        .spawn(move |priority| {
            if let Err(e) = priority {
                warn!("block clock runs without raised priority: {:?}", e);
            }
            info!("block clock: {} samples at {} Hz", fragsize, srate);
            let step = 2.0 * PI * 440.0 / srate as f32;
            let mut phase = 0.0f32;
            let mut input = vec![0.0f32; fragsize];
            let mut output = vec![0.0f32; fragsize];
            let mut deadline = Instant::now() + period;
            let tick = Arc::new(TimeoutEvent::at(deadline));
            let mut watcher = EventWatcher::new();
            watcher.observe(&stop);
            watcher.observe(&tick);
            let mut signaled = SignaledEvents::default();
            loop {
                watcher.wait_into(&mut signaled)?;
                if signaled.contains(stop.as_ref()) {
                    break;
                }
                for samp in input.iter_mut() {
                    *samp = 0.5 * phase.sin();
                    phase = (phase + step) % (2.0 * PI);
                }
                processor.process_block(&input, &mut output)?;
                deadline += period;
                tick.rearm(deadline);
                if processor.blocks_processed() % (srate as u64 / fragsize as u64).max(1) == 0 {
                    trace!("processed {} blocks", processor.blocks_processed());
                }
            }
            info!("block clock stopped after {} blocks", processor.blocks_processed());
            Ok(processor.blocks_processed())
        })?;
    Ok(handle)
}

#[cfg(test)]
mod test_processing {
    use super::*;
    use crate::hot_swap;

    #[test]
    fn smoothing_moves_toward_target() {
        let mut filter = SmoothingFilter::build(0.01, 48000.0, 0.0);
        assert!(filter.get(1.0) > 0.0);
        for _ in 0..48000 {
            filter.get(1.0);
        }
        assert!((filter.get_last_output() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn block_without_config_fails() {
        let (_writer, reader) = hot_swap::channel::<GainConfig>();
        let mut proc = BlockProcessor::new(GainPlugin::new(48000.0), reader);
        let mut out = [0.0; 4];
        assert_eq!(
            proc.process_block(&[1.0; 4], &mut out),
            Err(HotSwapError::NoConfiguration)
        );
        assert_eq!(proc.blocks_processed(), 0);
    }

    #[test]
    fn parameters_reach_the_plugin() {
        let (writer, reader) = hot_swap::channel();
        let mut params = GainParameters::new(writer, 0.0);
        let mut proc = BlockProcessor::new(GainPlugin::new(48000.0), reader);
        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];
        proc.process_block(&input, &mut output).unwrap();
        assert!((output[63] - 1.0).abs() < 1e-6);

        params.parse("db=-20").unwrap();
        for _ in 0..200 {
            proc.process_block(&input, &mut output).unwrap();
        }
        assert!((proc.plugin().current_gain() - 0.1).abs() < 1e-3);
        assert!((proc.plugin().peak() - 0.1).abs() < 1e-3);
        assert_eq!(params.parse("db?").unwrap(), "-20");
    }

    #[test]
    fn invalid_gain_is_rejected() {
        let (writer, _reader) = hot_swap::channel();
        let mut params = GainParameters::new(writer, -6.0);
        assert!(params.parse("db=100").is_err());
        assert!(params.parse("db=loud").is_err());
        assert!(params.parse("q=1").is_err());
        assert_eq!(params.db(), -6.0);
        assert_eq!(params.writer().peek_config(), Some(&GainConfig::from_db(-6.0)));
    }

    #[test]
    fn block_clock_runs_until_stopped() {
        let (writer, reader) = hot_swap::channel();
        let _params = GainParameters::new(writer, 0.0);
        let proc = BlockProcessor::new(GainPlugin::new(8000.0), reader);
        let stop = Arc::new(AsyncNotify::new().unwrap());
        let start = Instant::now();
        let handle = run_block_clock(proc, 80, 8000, stop.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        stop.set();
        let blocks = handle.join().unwrap().unwrap();
        assert!(blocks > 0);
        // paced at one block per 10 ms, not free running
        assert!(blocks as u128 <= start.elapsed().as_millis() / 10 + 1);
    }

    #[test]
    fn block_clock_rejects_zero_fragsize() {
        let (_writer, reader) = hot_swap::channel();
        let proc = BlockProcessor::new(GainPlugin::new(8000.0), reader);
        let stop = Arc::new(AsyncNotify::new().unwrap());
        assert!(run_block_clock(proc, 0, 8000, stop).is_err());
    }
}
