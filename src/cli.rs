// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing capture devices
//! - Running the filter pipeline headless, optionally recording

use filtercam::backends::camera::{CaptureSource, MediaKind, SourceKind, list_devices};
use filtercam::config::Config;
use filtercam::constants::timing::{FINALIZE_TIMEOUT, RUN_LOOP_POLL};
use filtercam::gpu::GpuContext;
use filtercam::pipelines::preview::{DisplayLink, LatestImage, OffscreenSurface, RenderStage};
use filtercam::pipelines::processing::FrameProcessor;
use filtercam::pipelines::video::{ExpectedTracks, GstMp4WriterFactory, RecordingSink};
use filtercam::shaders::{GpuImageStore, KernelLibrary};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Options of the `run` command; `None` keeps the configured value
#[derive(Debug, Default)]
pub struct RunOptions {
    pub duration: Option<u64>,
    pub record: bool,
    pub audio: bool,
    pub test_pattern: bool,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub output_dir: Option<PathBuf>,
}

/// List all capture devices
pub fn list_capture_devices() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    for (title, kind) in [("Cameras", MediaKind::Video), ("Microphones", MediaKind::Audio)] {
        let devices = list_devices(kind);
        println!("{}:", title);
        if devices.is_empty() {
            println!("  (none)");
        }
        for (index, device) in devices.iter().enumerate() {
            match device.position {
                Some(position) => println!("  [{}] {} ({:?})", index, device.name, position),
                None => println!("  [{}] {}", index, device.name),
            }
        }
        println!();
    }

    Ok(())
}

/// Capture, filter, present offscreen and optionally record until the
/// duration elapses or Ctrl+C is pressed
pub fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    if options.test_pattern {
        config.source = SourceKind::TestPattern;
    }
    if options.audio {
        config.audio_enabled = true;
    }
    if let Some(dir) = options.output_dir {
        config.output_dir = Some(dir);
    }
    for (name, value) in [
        ("contrast", options.contrast),
        ("saturation", options.saturation),
        ("brightness", options.brightness),
    ] {
        if let Some(value) = value {
            config.set_filter_value(name, value);
        }
    }

    let ctx = GpuContext::new_blocking("filtercam")?;
    println!("GPU: {} ({:?})", ctx.info.adapter_name, ctx.info.backend);

    let library = KernelLibrary::compile(&ctx)?;
    let chain = Arc::new(config.build_filter_chain(&library));
    for stage in chain.stages() {
        println!("Filter: {} {:?}", stage.name(), stage.factors());
    }

    let store = Arc::new(GpuImageStore::new(Arc::clone(&ctx)));
    let latest = Arc::new(LatestImage::default());

    let surface = OffscreenSurface::new(&ctx, config.width, config.height);
    let presented = surface.presented_counter();
    let render = Arc::new(RenderStage::new(
        Arc::clone(&ctx),
        Arc::clone(&latest),
        surface,
    ));

    let runtime = tokio::runtime::Runtime::new()?;
    let display_link = {
        let _guard = runtime.enter();
        DisplayLink::start(config.refresh_hz, render)
    };

    let recorder = options.record.then(|| {
        let expected = if config.audio_enabled {
            ExpectedTracks::video_and_audio()
        } else {
            ExpectedTracks::video_only()
        };
        Arc::new(RecordingSink::new(
            Box::new(GstMp4WriterFactory),
            expected,
            config.recordings_dir(),
        ))
    });

    let mut processor = FrameProcessor::new(store, chain, latest);
    if let Some(recorder) = &recorder {
        processor = processor.with_output(recorder.clone());
    }
    let processor = Arc::new(processor);

    let mut capture = CaptureSource::new(config.capture_config());
    capture.set_sink(processor.clone());
    capture.start()?;

    if let Some(recorder) = &recorder {
        let path = recorder.start_recording()?;
        println!("Recording to: {}", path.display());
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target = options.duration.map(Duration::from_secs);

    while target.is_none_or(|target| start.elapsed() < target) {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!(
            "\r{:02}:{:02}  frames: {}  presented: {}",
            elapsed / 60,
            elapsed % 60,
            processor.processed_frames(),
            presented.load(Ordering::Relaxed)
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(RUN_LOOP_POLL);
    }
    println!();

    capture.stop();
    capture.clear_sink();
    let ticks = runtime.block_on(display_link.stop());

    if let Some(recorder) = recorder {
        let (tx, rx) = std::sync::mpsc::channel();
        recorder.stop_recording(move |path| {
            let _ = tx.send(path);
        });

        match rx.recv_timeout(FINALIZE_TIMEOUT + Duration::from_secs(1)) {
            Ok(Some(path)) => println!("Video saved: {}", path.display()),
            Ok(None) => println!("No recording was written"),
            Err(_) => return Err("Timed out waiting for the recording to finalize".into()),
        }
    }

    println!(
        "Processed {} frames ({} dropped), {} display ticks",
        processor.processed_frames(),
        processor.dropped_frames(),
        ticks
    );

    Ok(())
}
