use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::simulated::{SimulatedCamera, SimulatedIllumination, SimulationControl, simulated_devices};
use super::*;
use crate::image_pipeline::common::FrameGeometry;
use crate::image_pipeline::common::error::PipelineError;
use crate::image_pipeline::processing::{DefaultStageFactory, Frame, FrameListener, ProcessorPool};
use crate::image_pipeline::raw::{FrameSource, RawFrame, SubFrame};

const GEOMETRY: FrameGeometry = FrameGeometry { width: 64, height: 48 };

fn filled(value: u16) -> Vec<u16> {
    vec![value; GEOMETRY.pixel_count()]
}

/// Pushes one well-formed sequence whose sub-frame `i` holds `base + i`.
fn push_sequence(sink: &FrameSynchronizer, base: u16) {
    for index in 0..4 {
        let data = filled(base + index);
        sink.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    }
}

fn armed_synchronizer() -> Arc<FrameSynchronizer> {
    let sync = Arc::new(FrameSynchronizer::new(GEOMETRY));
    sync.start();
    sync
}

#[test]
fn test_synchronizer_delivers_complete_sequence() {
    let sync = armed_synchronizer();
    push_sequence(&sync, 100);
    assert!(sync.has_complete_sequence());

    let mut out = RawFrame::new(GEOMETRY);
    sync.next_frame(&mut out, Some(Duration::from_secs(1))).unwrap();
    assert!(out.dark.data.iter().all(|&v| v == 100));
    for (band, plane) in out.channels.iter().enumerate() {
        assert!(plane.data.iter().all(|&v| v == 101 + band as u16));
    }
    assert!(!sync.has_complete_sequence());
    assert_eq!(sync.stats().sequences_completed, 1);
}

#[test]
fn test_synchronizer_waits_for_fourth_sub_frame() {
    let sync = armed_synchronizer();
    let data = filled(7);
    for _ in 0..3 {
        sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    }
    assert!(!sync.has_complete_sequence());

    let reader = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            let mut out = RawFrame::new(GEOMETRY);
            sync.next_frame(&mut out, Some(Duration::from_secs(5))).map(|_| out)
        })
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!reader.is_finished());

    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    let out = reader.join().unwrap().unwrap();
    assert!(out.channels[2].data.iter().all(|&v| v == 7));
}

#[test]
fn test_malformed_sub_frame_discards_sequence() {
    let sync = armed_synchronizer();
    let data = filled(50);
    let short = vec![50u16; 10];
    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    sync.on_sub_frame(SubFrame::incomplete(GEOMETRY.width, GEOMETRY.height, &data));
    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));

    assert!(!sync.has_complete_sequence());
    assert_eq!(sync.incomplete_score(), 1);
    assert_eq!(sync.stats().sequences_discarded, 1);

    // Alignment is kept: the next four sub-frames form a sequence again.
    push_sequence(&sync, 200);
    let mut out = RawFrame::new(GEOMETRY);
    sync.next_frame(&mut out, Some(Duration::from_secs(1))).unwrap();
    assert!(out.dark.data.iter().all(|&v| v == 200));

    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &short));
    assert_eq!(sync.incomplete_score(), 2);
    assert_eq!(sync.sequences_received(), 2);
}

#[test]
fn test_unread_sequence_is_replaced() {
    let sync = armed_synchronizer();
    push_sequence(&sync, 10);
    push_sequence(&sync, 20);
    assert_eq!(sync.stats().sequences_overwritten, 1);

    let mut out = RawFrame::new(GEOMETRY);
    sync.next_frame(&mut out, Some(Duration::from_secs(1))).unwrap();
    assert!(out.dark.data.iter().all(|&v| v == 20));
    assert!(matches!(
        sync.next_frame(&mut out, Some(Duration::from_millis(10))),
        Err(PipelineError::AcquisitionTimeout(_))
    ));
}

#[test]
fn test_device_fault_is_rethrown_once() {
    let sync = armed_synchronizer();
    let mut out = RawFrame::new(GEOMETRY);
    for base in [10, 20, 30] {
        push_sequence(&sync, base);
        sync.next_frame(&mut out, Some(Duration::from_secs(1))).unwrap();
    }

    sync.on_device_fault(PipelineError::DeviceFault("link lost".into()));
    sync.on_device_fault(PipelineError::DeviceFault("second fault".into()));

    match sync.next_frame(&mut out, Some(Duration::from_secs(1))) {
        Err(PipelineError::DeviceFault(message)) => assert_eq!(message, "link lost"),
        other => panic!("expected device fault, got {other:?}"),
    }
    assert!(matches!(
        sync.next_frame(&mut out, Some(Duration::from_millis(10))),
        Err(PipelineError::AcquisitionTimeout(_))
    ));
    assert!(out.dark.data.iter().all(|&v| v == 30));
}

#[test]
fn test_stop_wakes_blocked_reader() {
    let sync = armed_synchronizer();
    let reader = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            let mut out = RawFrame::new(GEOMETRY);
            sync.next_frame(&mut out, None)
        })
    };
    thread::sleep(Duration::from_millis(20));

    let stopped_at = Instant::now();
    sync.stop();
    let result = reader.join().unwrap();
    assert!(matches!(result, Err(PipelineError::Stopped)));
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!sync.is_armed());
}

#[test]
fn test_synchronizer_ignores_sub_frames_while_disarmed() {
    let sync = Arc::new(FrameSynchronizer::new(GEOMETRY));
    push_sequence(&sync, 1);
    assert!(!sync.has_complete_sequence());
    assert_eq!(sync.stats(), SynchronizerStats::default());

    let mut out = RawFrame::new(GEOMETRY);
    assert!(matches!(sync.next_frame(&mut out, None), Err(PipelineError::Stopped)));
}

#[test]
fn test_start_clears_previous_session() {
    let sync = armed_synchronizer();
    let data = filled(1);
    sync.on_sub_frame(SubFrame::incomplete(GEOMETRY.width, GEOMETRY.height, &data));
    sync.on_sub_frame(SubFrame::new(GEOMETRY.width, GEOMETRY.height, &data));
    sync.on_device_fault(PipelineError::DeviceFault("old".into()));
    sync.stop();

    sync.start();
    assert_eq!(sync.incomplete_score(), 0);
    push_sequence(&sync, 40);
    let mut out = RawFrame::new(GEOMETRY);
    sync.next_frame(&mut out, Some(Duration::from_secs(1))).unwrap();
    assert!(out.dark.data.iter().all(|&v| v == 40));
}

type SimController = SequenceController<SimulatedCamera, SimulatedIllumination>;

fn simulated_controller(config: &AcquisitionConfig, control: &SimulationControl) -> Arc<SimController> {
    let (camera, illumination) = simulated_devices(config.geometry, control.clone());
    Arc::new(SequenceController::new(camera, illumination, config))
}

fn small_config() -> AcquisitionConfig {
    AcquisitionConfig::builder()
        .refresh_rate(25.0)
        .illumination_time(5_000)
        .geometry(GEOMETRY)
        .build()
}

#[derive(Default)]
struct TimingListener {
    frames: Mutex<Vec<(Instant, f32)>>,
    errors: Mutex<Vec<String>>,
}

impl TimingListener {
    fn wait_until(&self, what: impl Fn(&TimingListener) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !what(self) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl FrameListener for TimingListener {
    fn on_new_frame_available(&self, frame: Frame) {
        self.frames.lock().unwrap().push((Instant::now(), frame.skin_ratio()));
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_owned());
    }
}

#[test]
fn test_simulated_session_runs_at_refresh_rate() {
    let config = small_config();
    let controller = simulated_controller(&config, &SimulationControl::new());
    let listener = Arc::new(TimingListener::default());
    let mut pool = ProcessorPool::new(
        Arc::clone(&controller),
        Arc::new(DefaultStageFactory),
        listener.clone(),
        config.geometry,
        2,
    );

    pool.start().unwrap();
    assert!(listener.wait_until(|l| l.frame_count() >= 10));
    pool.stop();
    assert!(!controller.is_streaming());

    let frames = listener.frames.lock().unwrap().clone();
    assert_eq!(listener.error_count(), 0);
    let span = frames[frames.len() - 1].0 - frames[0].0;
    let mean = span / (frames.len() as u32 - 1);
    assert!(
        mean >= Duration::from_millis(30) && mean <= Duration::from_millis(70),
        "mean frame interval {mean:?}"
    );
    for (_, ratio) in &frames {
        assert!((0.0..=1.0).contains(ratio));
        assert!(*ratio > 0.0);
    }
}

#[test]
fn test_device_fault_surfaces_once_through_pool() {
    let config = small_config();
    let control = SimulationControl::new();
    control.inject_fault_at(4, "sensor link lost");
    let controller = simulated_controller(&config, &control);
    let listener = Arc::new(TimingListener::default());
    let mut pool = ProcessorPool::new(controller, Arc::new(DefaultStageFactory), listener.clone(), GEOMETRY, 2);

    pool.start().unwrap();
    assert!(listener.wait_until(|l| l.error_count() > 0));
    thread::sleep(Duration::from_millis(150));
    pool.stop();

    let errors = listener.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("sensor link lost"));
    assert!(listener.frame_count() <= 3);
    assert!(pool.has_failed());
}

#[test]
fn test_device_fault_rethrown_by_controller() {
    let config = small_config();
    let control = SimulationControl::new();
    control.inject_fault_at(4, "sensor link lost");
    let controller = simulated_controller(&config, &control);

    controller.start().unwrap();
    let mut out = RawFrame::new(GEOMETRY);
    let mut delivered = 0;
    let fault = loop {
        match controller.next_frame(&mut out) {
            Ok(()) => delivered += 1,
            Err(err) => break err,
        }
        assert!(delivered <= 3, "fault was never raised");
    };
    controller.stop();

    assert!(matches!(fault, PipelineError::DeviceFault(ref m) if m == "sensor link lost"));
    assert!(fault.is_fatal());
}

#[test]
fn test_stop_unblocks_reader_of_stalled_device() {
    let config = small_config();
    let control = SimulationControl::new();
    control.set_stalled(true);
    let controller = simulated_controller(&config, &control);
    controller.start().unwrap();

    let reader = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let mut out = RawFrame::new(GEOMETRY);
            controller.next_frame(&mut out)
        })
    };
    thread::sleep(Duration::from_millis(50));

    let stopped_at = Instant::now();
    controller.stop();
    let result = reader.join().unwrap();
    assert!(matches!(result, Err(PipelineError::Stopped)));
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!controller.is_streaming());
}

#[test]
fn test_pool_stop_with_stalled_device() {
    let config = small_config();
    let control = SimulationControl::new();
    control.set_stalled(true);
    let controller = simulated_controller(&config, &control);
    let listener = Arc::new(TimingListener::default());
    let mut pool = ProcessorPool::new(controller, Arc::new(DefaultStageFactory), listener.clone(), GEOMETRY, 4);

    pool.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    let stopped_at = Instant::now();
    pool.stop();

    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(listener.frame_count(), 0);
    assert_eq!(listener.error_count(), 0);
}

#[test]
fn test_malformed_sub_frames_reported_in_status() {
    let config = small_config();
    let control = SimulationControl::new();
    control.corrupt_sub_frame(2, 1);
    let controller = simulated_controller(&config, &control);

    controller.start().unwrap();
    let mut out = RawFrame::new(GEOMETRY);
    for _ in 0..3 {
        controller.next_frame(&mut out).unwrap();
    }
    let status = controller.camera_status();
    controller.stop();

    assert_eq!(status.incomplete_sub_frames, 1);
    assert!(status.packets_lost >= 1);
    assert!(status.packet_loss_percent() > 0.0);
    assert!(status.packet_loss_percent() < 5.0);
    assert_eq!(controller.synchronizer().stats().sequences_discarded, 1);
}

#[test]
fn test_controller_restarts_after_stop() {
    let config = small_config();
    let controller = simulated_controller(&config, &SimulationControl::new());
    let mut out = RawFrame::new(GEOMETRY);

    controller.start().unwrap();
    controller.start().unwrap();
    controller.next_frame(&mut out).unwrap();
    controller.stop();
    controller.stop();
    assert!(matches!(controller.next_frame(&mut out), Err(PipelineError::Stopped)));

    controller.start().unwrap();
    controller.next_frame(&mut out).unwrap();
    assert!(out.dark.data.iter().all(|&v| (170..=190).contains(&v)));
    controller.stop();
}

#[test]
fn test_controller_setters_clamp() {
    let config = small_config();
    let controller = simulated_controller(&config, &SimulationControl::new());

    assert_eq!(controller.set_refresh_rate(500.0).unwrap(), 50.0);
    assert_eq!(controller.set_refresh_rate(0.1).unwrap(), limits::MIN_REFRESH_RATE_HZ);
    assert_eq!(controller.set_illumination_time(100).unwrap(), limits::MIN_ILLUMINATION_TIME_US);
    assert_eq!(controller.set_exposure_time(10).unwrap(), limits::MIN_EXPOSURE_TIME_US);
    assert_eq!(controller.set_exposure_time(1_000_000).unwrap(), controller.illumination_time());
    assert_eq!(controller.set_gain(-3.0).unwrap(), limits::MIN_GAIN_DB);
    assert_eq!(controller.set_gain(30.0).unwrap(), limits::MAX_GAIN_DB);
    assert_eq!(controller.set_temperature_setpoint(-100.0).unwrap(), limits::MIN_TEMPERATURE_SETPOINT_C);
    assert_eq!(controller.set_channel_power(0, 150.0).unwrap(), limits::MAX_CHANNEL_POWER_PERCENT);
    assert!(matches!(controller.set_channel_power(3, 50.0), Err(PipelineError::InvalidChannel(3))));
    assert_eq!(controller.channel_power(), [100.0; 3]);
}

#[test]
fn test_longer_illumination_lowers_rate_and_exposure() {
    let config = AcquisitionConfig::builder()
        .refresh_rate(50.0)
        .illumination_time(5_000)
        .exposure_time(5_000)
        .geometry(GEOMETRY)
        .build();
    let controller = simulated_controller(&config, &SimulationControl::new());

    assert_eq!(controller.set_illumination_time(10_000).unwrap(), 10_000);
    assert_eq!(controller.refresh_rate(), 25.0);
    assert_eq!(controller.sequence_configuration().delay_us, 0);
    assert_eq!(controller.exposure_time(), 5_000);

    assert_eq!(controller.set_illumination_time(1_000).unwrap(), 1_000);
    assert_eq!(controller.exposure_time(), 1_000);
    let sequence = controller.sequence_configuration();
    assert_eq!(sequence.illumination_time_us, 1_000);
    assert_eq!(sequence.delay_us, 40_000 - 4_000);
}

#[test]
fn test_packet_loss_percent() {
    let status = CameraStatus {
        packets_received: 990,
        packets_lost: 10,
        ..CameraStatus::default()
    };
    assert_eq!(status.packet_loss_percent(), 1.0);
    assert_eq!(CameraStatus::default().packet_loss_percent(), 0.0);
}
