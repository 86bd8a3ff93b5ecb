//! Capture engine: a dedicated OS thread that owns all camera access and
//! serves enrollment and recognition requests from the HTTP handlers.
//!
//! Requests arrive over a bounded mpsc channel and are answered on oneshot
//! replies, so concurrent HTTP requests queue instead of racing for the
//! device. The engine opens a fresh capture session per request and the
//! session is released on every exit path.

use rollcall_core::{
    AttendanceJournal, EncodingStore, JournalError, StoreError, Vision, VisionError,
};
use rollcall_core::types::Encoding;
use rollcall_hw::{overlay, CameraError, CancelToken, CaptureSession, Frame, FrameSource};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("no face detected in the reference image")]
    NoFaceDetected,
    #[error("{0} faces detected in the reference image, exactly one required")]
    MultipleFacesDetected(usize),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Whether this is an enrollment rejection (bad reference image) rather
    /// than an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::NoFaceDetected | EngineError::MultipleFacesDetected(_)
        )
    }
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Recognize {
        reply: oneshot::Sender<Result<Vec<String>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    cancel: CancelToken,
    preview: Arc<Mutex<Option<Vec<u8>>>>,
}

impl EngineHandle {
    /// Request enrollment: capture a reference frame, extract its encoding,
    /// persist it under `name`.
    pub async fn enroll(&self, name: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request a recognition session: capture frames until cancelled or the
    /// stream ends, returning the distinct recognized names.
    pub async fn recognize(&self) -> Result<Vec<String>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Fire the cancellation token for the capture loop currently running
    /// (or the next one to check it).
    pub fn stop_capture(&self) {
        self.cancel.cancel();
    }

    /// Most recent annotated recognition frame, JPEG-encoded.
    pub fn latest_preview(&self) -> Option<Vec<u8>> {
        match self.preview.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        }
    }
}

/// Spawn the engine on a dedicated OS thread, opening real capture sessions
/// on the configured camera device.
pub fn spawn_engine(
    config: &Config,
    vision: Box<dyn Vision + Send>,
) -> Result<EngineHandle, EngineError> {
    let store = EncodingStore::open(&config.registered_faces_dir)?;
    let journal = AttendanceJournal::new(&config.attendance_file);
    let device = config.camera_device.clone();

    Ok(spawn_with_source(
        store,
        journal,
        config.tolerance,
        config.enroll_frames,
        vision,
        move || CaptureSession::open(&device),
    ))
}

/// Spawn the engine thread with an arbitrary frame-source factory.
///
/// The factory runs on the engine thread once per request; the source is
/// dropped (releasing the device) before the request is answered.
pub(crate) fn spawn_with_source<S, F>(
    store: EncodingStore,
    journal: AttendanceJournal,
    tolerance: f32,
    enroll_frames: usize,
    mut vision: Box<dyn Vision + Send>,
    mut open_source: F,
) -> EngineHandle
where
    S: FrameSource,
    F: FnMut() -> Result<S, CameraError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let cancel = CancelToken::new();
    let preview: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));

    let thread_cancel = cancel.clone();
    let thread_preview = Arc::clone(&preview);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { name, reply } => {
                        thread_cancel.reset();
                        let result = open_source().map_err(EngineError::from).and_then(|src| {
                            run_enroll(
                                src,
                                vision.as_mut(),
                                &store,
                                &name,
                                enroll_frames,
                                &thread_cancel,
                            )
                        });
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { reply } => {
                        thread_cancel.reset();
                        let result = open_source().map_err(EngineError::from).and_then(|src| {
                            run_recognize(
                                src,
                                vision.as_mut(),
                                &store,
                                &journal,
                                tolerance,
                                &thread_cancel,
                                &thread_preview,
                            )
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        cancel,
        preview,
    }
}

/// Enrollment: capture a reference frame, release the camera, then extract
/// and persist the encoding. Rejects reference images without exactly one
/// face and removes the image artifact on rejection.
fn run_enroll<S: FrameSource>(
    mut source: S,
    vision: &mut dyn Vision,
    store: &EncodingStore,
    name: &str,
    frame_budget: usize,
    cancel: &CancelToken,
) -> Result<(), EngineError> {
    let reference = capture_reference(&mut source, frame_budget, cancel)?;
    // Release the camera before the (slow) detection step
    drop(source);

    store.put_reference_image(name, &reference.data, reference.width, reference.height)?;

    match encode_single_face(vision, &reference) {
        Ok(encoding) => {
            store.put(name, &encoding)?;
            tracing::info!(name, "face registered");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(name, error = %err, "enrollment rejected");
            if let Err(rm) = store.remove_reference_image(name) {
                tracing::warn!(name, error = %rm, "failed to remove rejected reference image");
            }
            Err(err)
        }
    }
}

/// Read the first frame as the reference, then drain the remaining frame
/// budget without reprocessing. The drain is a warm-up countdown, not
/// multi-frame averaging; cancellation or end-of-stream cuts it short.
fn capture_reference<S: FrameSource>(
    source: &mut S,
    frame_budget: usize,
    cancel: &CancelToken,
) -> Result<Frame, EngineError> {
    let reference = source.read_frame()?;
    tracing::debug!(
        width = reference.width,
        height = reference.height,
        "reference frame captured"
    );

    for _ in 1..frame_budget {
        if cancel.is_cancelled() {
            break;
        }
        match source.read_frame() {
            Ok(_) => {}
            Err(CameraError::EndOfStream) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(reference)
}

/// Detect faces in the reference frame and return the encoding only when
/// exactly one face is present.
fn encode_single_face(vision: &mut dyn Vision, frame: &Frame) -> Result<Encoding, EngineError> {
    let regions = vision.detect_faces(&frame.data, frame.width, frame.height)?;
    match regions.len() {
        0 => Err(EngineError::NoFaceDetected),
        1 => {
            let mut encodings =
                vision.encode_faces(&frame.data, frame.width, frame.height, &regions)?;
            encodings.pop().ok_or(EngineError::NoFaceDetected)
        }
        n => Err(EngineError::MultipleFacesDetected(n)),
    }
}

/// Recognition: match every detected face in every frame against the
/// registered set until cancelled or the stream ends.
///
/// The returned set is deduplicated per session; the journal receives one
/// entry per matching detection event, so a face matched across N frames
/// yields N journal lines but one name.
fn run_recognize<S: FrameSource>(
    mut source: S,
    vision: &mut dyn Vision,
    store: &EncodingStore,
    journal: &AttendanceJournal,
    tolerance: f32,
    cancel: &CancelToken,
    preview: &Mutex<Option<Vec<u8>>>,
) -> Result<Vec<String>, EngineError> {
    let registered = store.get_all()?;
    tracing::info!(registered = registered.len(), tolerance, "recognition session started");

    let mut recognized = BTreeSet::new();

    loop {
        if cancel.is_cancelled() {
            tracing::info!("recognition cancelled");
            break;
        }
        let mut frame = match source.read_frame() {
            Ok(f) => f,
            Err(CameraError::EndOfStream) => {
                tracing::info!("camera stream ended");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let regions = vision.detect_faces(&frame.data, frame.width, frame.height)?;
        let encodings = vision.encode_faces(&frame.data, frame.width, frame.height, &regions)?;

        for (region, encoding) in regions.iter().zip(encodings.iter()) {
            // First registered face within tolerance wins, in store
            // enumeration order. No ranking by closeness.
            for face in &registered {
                if encoding.matches(&face.encoding, tolerance) {
                    recognized.insert(face.name.clone());
                    journal.append_now(&face.name)?;
                    overlay::annotate_match(
                        &mut frame,
                        region.x,
                        region.y,
                        region.width,
                        region.height,
                        &face.name,
                    );
                    break;
                }
            }
        }

        publish_preview(preview, &frame);
    }

    Ok(recognized.into_iter().collect())
}

/// Replace the shared preview with a JPEG of the (possibly annotated) frame.
/// Preview failures are logged and swallowed; they never abort recognition.
fn publish_preview(preview: &Mutex<Option<Vec<u8>>>, frame: &Frame) {
    match frame.to_jpeg() {
        Ok(jpeg) => {
            if let Ok(mut slot) = preview.lock() {
                *slot = Some(jpeg);
            }
        }
        Err(e) => tracing::warn!(error = %e, "preview encode failed"),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    const EMPTY_SCENE: u8 = 0;
    const ALICE_SCENE: u8 = 1;
    const CROWD_SCENE: u8 = 2;

    struct Fixture {
        _tmp: TempDir,
        store: EncodingStore,
        journal: AttendanceJournal,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path().join("registered_faces")).unwrap();
        let journal = AttendanceJournal::new(tmp.path().join("attendance.csv"));
        Fixture {
            _tmp: tmp,
            store,
            journal,
        }
    }

    fn alice_vision() -> FakeVision {
        FakeVision::new()
            .with_scene(ALICE_SCENE, vec![enc(vec![0.1, 0.1])])
            .with_scene(EMPTY_SCENE, vec![])
    }

    fn journal_lines(journal: &AttendanceJournal) -> Vec<String> {
        match std::fs::read_to_string(journal.path()) {
            Ok(s) => s.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_enroll_success_persists_encoding_and_image() {
        let fx = fixture();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 50]);

        run_enroll(source, &mut vision, &fx.store, "alice", 50, &CancelToken::new()).unwrap();

        let faces = fx.store.get_all().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, "alice");
        assert!(fx.store.reference_image_path("alice").exists());
    }

    #[test]
    fn test_enroll_zero_faces_rejected_and_artifact_removed() {
        let fx = fixture();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(EMPTY_SCENE); 50]);

        let err = run_enroll(source, &mut vision, &fx.store, "bob", 50, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, EngineError::NoFaceDetected));
        assert!(err.is_rejection());
        assert!(fx.store.get_all().unwrap().is_empty());
        assert!(!fx.store.reference_image_path("bob").exists());
    }

    #[test]
    fn test_enroll_multiple_faces_rejected() {
        let fx = fixture();
        let mut vision = FakeVision::new()
            .with_scene(CROWD_SCENE, vec![enc(vec![0.1]), enc(vec![0.9])]);
        let source = FakeSource::new(vec![scene_frame(CROWD_SCENE); 50]);

        let err = run_enroll(source, &mut vision, &fx.store, "crowd", 50, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, EngineError::MultipleFacesDetected(2)));
        assert!(fx.store.get_all().unwrap().is_empty());
        assert!(!fx.store.reference_image_path("crowd").exists());
    }

    #[test]
    fn test_enroll_uses_first_frame_as_reference() {
        let fx = fixture();
        let mut vision = alice_vision();
        // Only the first frame contains alice; the drained frames are empty
        let mut frames = vec![scene_frame(ALICE_SCENE)];
        frames.extend(vec![scene_frame(EMPTY_SCENE); 49]);
        let source = FakeSource::new(frames);

        run_enroll(source, &mut vision, &fx.store, "alice", 50, &CancelToken::new()).unwrap();
        assert_eq!(fx.store.names().unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_enroll_tolerates_stream_ending_during_drain() {
        let fx = fixture();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 3]);

        run_enroll(source, &mut vision, &fx.store, "alice", 50, &CancelToken::new()).unwrap();
        assert_eq!(fx.store.names().unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_enroll_fails_when_no_first_frame() {
        let fx = fixture();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![]);

        let err = run_enroll(source, &mut vision, &fx.store, "alice", 50, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Camera(CameraError::EndOfStream)));
    }

    #[test]
    fn test_recognize_empty_store_returns_empty_set() {
        let fx = fixture();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 5]);
        let preview = Mutex::new(None);

        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        assert!(names.is_empty());
        assert!(journal_lines(&fx.journal).is_empty());
    }

    #[test]
    fn test_recognize_set_deduped_journal_per_event() {
        let fx = fixture();
        fx.store.put("alice", &enc(vec![0.0, 0.0])).unwrap();
        // Live encoding distance sqrt(0.02) ~ 0.14, well within 0.6
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 5]);
        let preview = Mutex::new(None);

        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        assert_eq!(names, vec!["alice"]);
        let lines = journal_lines(&fx.journal);
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.starts_with("alice,")));
    }

    #[test]
    fn test_recognize_first_match_in_enumeration_order_wins() {
        let fx = fixture();
        // Both within tolerance of the probe; enumeration order is sorted by
        // name, so alice must win every time.
        fx.store.put("alice", &enc(vec![0.0, 0.0])).unwrap();
        fx.store.put("zed", &enc(vec![0.05, 0.05])).unwrap();
        let mut vision = FakeVision::new().with_scene(ALICE_SCENE, vec![enc(vec![0.02, 0.02])]);
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 3]);
        let preview = Mutex::new(None);

        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        assert_eq!(names, vec!["alice"]);
        let lines = journal_lines(&fx.journal);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.starts_with("alice,")));
    }

    #[test]
    fn test_recognize_no_match_beyond_tolerance() {
        let fx = fixture();
        fx.store.put("alice", &enc(vec![5.0, 5.0])).unwrap();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 4]);
        let preview = Mutex::new(None);

        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        assert!(names.is_empty());
        assert!(journal_lines(&fx.journal).is_empty());
    }

    #[test]
    fn test_recognize_stops_on_cancel() {
        let fx = fixture();
        let mut vision = alice_vision();
        let cancel = CancelToken::new();
        // Plenty of frames left when the token fires after 3 reads
        let source =
            FakeSource::cancelling_after(vec![scene_frame(EMPTY_SCENE); 1000], 3, cancel.clone());
        let preview = Mutex::new(None);

        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &cancel,
            &preview,
        )
        .unwrap();

        assert!(names.is_empty());
    }

    #[test]
    fn test_recognize_publishes_annotated_preview() {
        let fx = fixture();
        fx.store.put("alice", &enc(vec![0.0, 0.0])).unwrap();
        let mut vision = alice_vision();
        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE)]);
        let preview = Mutex::new(None);

        run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        let jpeg = preview.lock().unwrap().clone().expect("preview published");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_end_to_end_enroll_then_recognize() {
        let fx = fixture();
        let mut vision = alice_vision();

        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE); 50]);
        run_enroll(source, &mut vision, &fx.store, "alice", 50, &CancelToken::new()).unwrap();

        let source = FakeSource::new(vec![scene_frame(ALICE_SCENE)]);
        let preview = Mutex::new(None);
        let names = run_recognize(
            source,
            &mut vision,
            &fx.store,
            &fx.journal,
            0.6,
            &CancelToken::new(),
            &preview,
        )
        .unwrap();

        assert_eq!(names, vec!["alice"]);
        let lines = journal_lines(&fx.journal);
        assert_eq!(lines.len(), 1);
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        assert!(
            lines[0].starts_with(&format!("alice,{today},")),
            "unexpected journal line: {}",
            lines[0]
        );
    }

    #[tokio::test]
    async fn test_engine_handle_round_trip() {
        let fx = fixture();
        let vision = Box::new(alice_vision());
        let handle = spawn_with_source(fx.store, fx.journal, 0.6, 5, vision, || {
            Ok(FakeSource::new(vec![scene_frame(ALICE_SCENE); 5]))
        });

        handle.enroll("alice".into()).await.unwrap();
        let names = handle.recognize().await.unwrap();
        assert_eq!(names, vec!["alice"]);
        assert!(handle.latest_preview().is_some());
    }

    #[tokio::test]
    async fn test_engine_handle_propagates_device_unavailable() {
        let fx = fixture();
        let vision = Box::new(alice_vision());
        let handle = spawn_with_source(fx.store, fx.journal, 0.6, 5, vision, || {
            Err::<FakeSource, _>(CameraError::DeviceUnavailable("/dev/video0: busy".into()))
        });

        let err = handle.enroll("alice".into()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Camera(CameraError::DeviceUnavailable(_))
        ));
    }
}
