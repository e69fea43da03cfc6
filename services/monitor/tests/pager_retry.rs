/// Pager outage: the endpoint rejects the first three attempts, then
/// accepts. The payload waits on the pending-page queue and the drainer
/// retries with 1-second spacing; exactly one page is ultimately accepted.
use aki_test_utils::{MllpProducer, PagerStub, ProducerStep};
use monitor::config::Endpoint;
use monitor::metrics::Metrics;
use monitor::pager::{PagerClient, run_pager_drainer};
use monitor::pipeline::Pipeline;
use monitor::predictor::Predictor;
use monitor::storage::{PatientStore, PendingQueues};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tokio::time::{Duration, timeout};

const ADMIT: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240107133000||ADT^A01|||2.5\r\
                     PID|1||1001||X||19600101|M\r";
const LAB: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240101120000||ORU^R01|||2.5\r\
                   PID|1||1001\r\
                   OBR|1||||||20240101120000\r\
                   OBX|1|SN|CREATININE||250.0\r";

struct AlwaysPositive;

impl Predictor for AlwaysPositive {
    fn predict(&self, _features: &[f64; 5]) -> u8 {
        1
    }
}

#[tokio::test]
async fn pager_outage_retries_until_accepted() {
    let producer = MllpProducer::start(vec![vec![
        ProducerStep::send_message(ADMIT),
        ProducerStep::AwaitAcks(1),
        ProducerStep::send_message(LAB),
        ProducerStep::AwaitAcks(1),
    ]])
    .await
    .expect("producer");
    // Unreachable for three attempts, then healthy.
    let stub = PagerStub::start(3).await.expect("pager stub");

    let dir = tempfile::tempdir().expect("temp dir");
    let store = PatientStore::open(&dir.path().join("aki.sqlite3")).expect("open store");
    let predictor: Arc<dyn Predictor + Send + Sync> = Arc::new(AlwaysPositive);
    let pager = PagerClient::new(&stub.addr().to_string()).expect("pager client");
    let queues = PendingQueues::new();
    let metrics = Metrics::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pager_drainer = tokio::spawn(run_pager_drainer(
        pager.clone(),
        queues.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let pipeline = Pipeline::new(
        Endpoint {
            host: producer.addr().ip().to_string(),
            port: producer.addr().port(),
        },
        store,
        predictor,
        pager,
        queues.clone(),
        metrics.clone(),
        shutdown_rx,
    );
    let pipeline = tokio::spawn(pipeline.begin());

    // ~3 seconds of retries before the accept; allow slack.
    timeout(Duration::from_secs(10), stub.wait_for_bodies(1))
        .await
        .expect("page eventually accepted");

    assert_eq!(stub.bodies(), vec!["1001,20240101120000".to_owned()]);
    assert_eq!(stub.attempts(), 4, "three failures then one success");
    assert!(metrics.failed_http.load(Ordering::Relaxed) >= 3);

    // Give the drainer one tick to observe the delivery, then check the
    // queue drained.
    timeout(Duration::from_secs(5), async {
        loop {
            if queues.pages().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("pending page removed after acceptance");

    shutdown_tx.send(true).expect("send shutdown");
    timeout(Duration::from_secs(5), pipeline)
        .await
        .expect("pipeline should stop")
        .expect("pipeline task")
        .expect("pipeline exits cleanly");
    timeout(Duration::from_secs(5), pager_drainer)
        .await
        .expect("pager drainer should stop")
        .expect("pager drainer task");
}
