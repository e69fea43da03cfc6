/// End-to-end ingest scenarios against a scripted MLLP producer and a
/// scripted pager endpoint. The real pipeline, drainers, store, and queues
/// run; only the classifier is replaced with a fixed verdict.
use aki_test_utils::{MllpProducer, PagerStub, ProducerStep};
use monitor::config::Endpoint;
use monitor::drainer::InferenceDrainer;
use monitor::metrics::Metrics;
use monitor::pager::{PagerClient, run_pager_drainer};
use monitor::pipeline::Pipeline;
use monitor::predictor::Predictor;
use monitor::storage::{PatientStore, PendingQueues, StoreError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

const ADMIT: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240107133000||ADT^A01|||2.5\r\
                     PID|1||1001||X||19600101|M\r";
const LAB: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240101120000||ORU^R01|||2.5\r\
                   PID|1||1001\r\
                   OBR|1||||||20240101120000\r\
                   OBX|1|SN|CREATININE||250.0\r";
const LAB_NO_CREATININE: &str =
    "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240101120000||ORU^R01|||2.5\r\
     PID|1||1001\r\
     OBR|1\r\
     OBX|1|SN|GLUCOSE||5.0\r";

struct AlwaysPositive;

impl Predictor for AlwaysPositive {
    fn predict(&self, _features: &[f64; 5]) -> u8 {
        1
    }
}

/// The full monitor stack minus `main`: pipeline plus both drainers.
struct Harness {
    metrics: Arc<Metrics>,
    queues: PendingQueues,
    db_path: PathBuf,
    shutdown: watch::Sender<bool>,
    pipeline: JoinHandle<Result<(), StoreError>>,
    drainer: JoinHandle<()>,
    pager_drainer: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(mllp_addr: SocketAddr, pager_addr: SocketAddr) -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("aki.sqlite3");
        let store = PatientStore::open(&db_path).expect("open store");
        let reader = PatientStore::open_read_only(&db_path).expect("read-only handle");

        let predictor: Arc<dyn Predictor + Send + Sync> = Arc::new(AlwaysPositive);
        let pager = PagerClient::new(&pager_addr.to_string()).expect("pager client");
        let queues = PendingQueues::new();
        let metrics = Metrics::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let drainer = InferenceDrainer::new(
            reader,
            predictor.clone(),
            pager.clone(),
            queues.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        let drainer = tokio::spawn(drainer.begin());
        let pager_drainer = tokio::spawn(run_pager_drainer(
            pager.clone(),
            queues.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        ));

        let mllp = Endpoint {
            host: mllp_addr.ip().to_string(),
            port: mllp_addr.port(),
        };
        let pipeline = Pipeline::new(
            mllp,
            store,
            predictor,
            pager,
            queues.clone(),
            metrics.clone(),
            shutdown_rx,
        );
        let pipeline = tokio::spawn(pipeline.begin());

        Harness {
            metrics,
            queues,
            db_path,
            shutdown: shutdown_tx,
            pipeline,
            drainer,
            pager_drainer,
            _dir: dir,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("send shutdown");
        let result = timeout(Duration::from_secs(5), self.pipeline)
            .await
            .expect("pipeline should stop")
            .expect("pipeline task");
        result.expect("pipeline exits cleanly");
        timeout(Duration::from_secs(5), self.drainer)
            .await
            .expect("drainer should stop")
            .expect("drainer task");
        timeout(Duration::from_secs(5), self.pager_drainer)
            .await
            .expect("pager drainer should stop")
            .expect("pager drainer task");
    }

    fn lab_row_count(&self) -> i64 {
        let conn = rusqlite::Connection::open(&self.db_path).expect("raw open");
        conn.query_row("SELECT COUNT(*) FROM blood_tests", [], |row| row.get(0))
            .expect("count")
    }
}

#[tokio::test]
async fn admit_then_lab_triggers_a_page() {
    let producer = MllpProducer::start(vec![vec![
        ProducerStep::send_message(ADMIT),
        ProducerStep::AwaitAcks(1),
        ProducerStep::send_message(LAB),
        ProducerStep::AwaitAcks(1),
    ]])
    .await
    .expect("producer");
    let stub = PagerStub::start(0).await.expect("pager stub");

    let harness = Harness::start(producer.addr(), stub.addr()).await;

    timeout(Duration::from_secs(5), producer.wait_for_acks(2))
        .await
        .expect("both messages acked");
    timeout(Duration::from_secs(5), stub.wait_for_bodies(1))
        .await
        .expect("page delivered");

    assert_eq!(producer.ack_codes(), vec!["AA".to_owned(), "AA".to_owned()]);
    assert_eq!(stub.bodies(), vec!["1001,20240101120000".to_owned()]);

    harness.stop().await;
}

#[tokio::test]
async fn lab_before_admit_is_paged_by_the_drainer() {
    let producer = MllpProducer::start(vec![vec![
        ProducerStep::send_message(LAB),
        ProducerStep::AwaitAcks(1),
        ProducerStep::send_message(ADMIT),
        ProducerStep::AwaitAcks(1),
    ]])
    .await
    .expect("producer");
    let stub = PagerStub::start(0).await.expect("pager stub");

    let harness = Harness::start(producer.addr(), stub.addr()).await;

    timeout(Duration::from_secs(5), producer.wait_for_acks(2))
        .await
        .expect("both messages acked");
    // The lab could not be scored at ingest; the admit unblocks it and the
    // drainer pages within one tick.
    timeout(Duration::from_secs(5), stub.wait_for_bodies(1))
        .await
        .expect("page delivered by the drainer");

    assert_eq!(producer.ack_codes(), vec!["AA".to_owned(), "AA".to_owned()]);
    assert_eq!(stub.bodies(), vec!["1001,20240101120000".to_owned()]);
    assert!(
        harness.queues.inference().is_empty(),
        "resolved entry must leave the queue"
    );

    harness.stop().await;
}

#[tokio::test]
async fn unparseable_message_is_acked_ae_and_dropped() {
    let producer = MllpProducer::start(vec![vec![
        ProducerStep::send_message(LAB_NO_CREATININE),
        ProducerStep::AwaitAcks(1),
    ]])
    .await
    .expect("producer");
    let stub = PagerStub::start(0).await.expect("pager stub");

    let harness = Harness::start(producer.addr(), stub.addr()).await;

    timeout(Duration::from_secs(5), producer.wait_for_acks(1))
        .await
        .expect("message acked");

    assert_eq!(producer.ack_codes(), vec!["AE".to_owned()]);
    assert_eq!(stub.attempts(), 0, "no pager call for a dropped message");
    assert_eq!(harness.lab_row_count(), 0, "no store writes");

    harness.stop().await;
}

#[tokio::test]
async fn connection_drop_mid_frame_loses_only_the_partial_message() {
    let partial = hl7_core::mllp::frame(LAB.as_bytes());
    let producer = MllpProducer::start(vec![
        vec![
            ProducerStep::send_message(ADMIT),
            ProducerStep::AwaitAcks(1),
            // Half a frame, then the connection closes.
            ProducerStep::Send(partial[..partial.len() / 2].to_vec()),
        ],
        vec![
            ProducerStep::send_message(LAB),
            ProducerStep::AwaitAcks(1),
        ],
    ])
    .await
    .expect("producer");
    let stub = PagerStub::start(0).await.expect("pager stub");

    let harness = Harness::start(producer.addr(), stub.addr()).await;

    timeout(Duration::from_secs(5), producer.wait_for_acks(2))
        .await
        .expect("admit and resent lab acked");
    timeout(Duration::from_secs(5), stub.wait_for_bodies(1))
        .await
        .expect("page for the resent lab");

    // One ACK per complete message; none for the truncated frame.
    assert_eq!(producer.ack_codes(), vec!["AA".to_owned(), "AA".to_owned()]);
    assert_eq!(harness.lab_row_count(), 1, "partial frame must not be stored");
    assert!(
        harness
            .metrics
            .mllp_connections_made
            .load(std::sync::atomic::Ordering::Relaxed)
            >= 2,
        "the pipeline reconnected"
    );

    harness.stop().await;
}
