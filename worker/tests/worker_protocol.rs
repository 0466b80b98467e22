use comms::{
    OnoReceiver, OnoSender, ProtocolErr,
    task::{self, InitRequest, TaskRequest, UnitRequest},
};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use worker::{CpuKernel, Worker, WorkerConfig, WorkerErr};

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

/// Spawns a CPU worker and returns the coordinator's end of its channel.
fn spawn_worker() -> (Rx, Tx, JoinHandle<Result<usize, WorkerErr>>) {
    let (coordinator_end, worker_end) = io::duplex(64 * 1024);

    let (rx, tx) = io::split(worker_end);
    let (rx, tx) = comms::channel(rx, tx);
    let handle = tokio::spawn(async move {
        let config = WorkerConfig {
            index: 0,
            device: 0,
            seed: Some(5),
        };
        let mut worker = Worker::new(config, CpuKernel::new(config.sampler_seed()));
        worker.run(rx, tx).await.map(|()| worker.loaded())
    });

    let (rx, tx) = io::split(coordinator_end);
    let (rx, tx) = comms::channel(rx, tx);
    (rx, tx, handle)
}

/// Two points near `-5` and two near `5`, on one dimension.
fn init() -> TaskRequest {
    TaskRequest::Init(InitRequest {
        nobs: 4,
        ndim: 1,
        device: 0,
        data: vec![-5.1, 4.9, -4.8, 5.2],
    })
}

fn unit(local_index: usize, global_id: usize, relabel: bool) -> UnitRequest {
    UnitRequest {
        local_index,
        global_id,
        ncomp: 2,
        ndim: 1,
        relabel,
        weights: vec![0.4, 0.6],
        means: vec![-5.0, 5.0],
        covariances: vec![1.0, 1.0],
    }
}

#[tokio::test]
async fn serves_init_and_rounds_until_the_poison_pill() {
    let (mut rx, mut tx, handle) = spawn_worker();
    let mut buf = Vec::new();

    task::send_request(&mut tx, &init()).await.unwrap();
    assert_eq!(task::recv_init_ack(&mut rx, &mut buf).await.unwrap(), 0);

    task::send_request(&mut tx, &init()).await.unwrap();
    assert_eq!(task::recv_init_ack(&mut rx, &mut buf).await.unwrap(), 1);

    let request = TaskRequest::AssignLabels(vec![unit(0, 3, true), unit(1, 8, true)]);
    task::send_request(&mut tx, &request).await.unwrap();
    let labels = task::recv_label_results(&mut rx, &mut buf, 2, true).await.unwrap();

    assert_eq!(labels.len(), 2);
    assert_eq!(labels[1].global_id, 8);
    assert_eq!(labels[0].global_id, 3);
    assert_eq!(labels[0].labels, [0, 1, 0, 1]);
    assert_eq!(labels[0].z.as_deref(), Some(&[1, 0, 1, 0][..]));

    let request = TaskRequest::ExpectedStats(vec![unit(0, 3, false)]);
    task::send_request(&mut tx, &request).await.unwrap();
    let stats = task::recv_stats_results(&mut rx, &mut buf, 1, 2, 1).await.unwrap();

    assert_eq!(stats[0].nobs, 4);
    assert!((stats[0].counts.iter().sum::<f64>() - 4.0).abs() < 1e-9);
    assert!((stats[0].mean_sums[0] + 9.9).abs() < 1e-6);
    assert!(stats[0].log_likelihood < 0.0);

    task::send_request(&mut tx, &TaskRequest::Shutdown).await.unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn unknown_datasets_are_reported_and_the_worker_keeps_serving() {
    let (mut rx, mut tx, handle) = spawn_worker();
    let mut buf = Vec::new();

    task::send_request(&mut tx, &init()).await.unwrap();
    task::recv_init_ack(&mut rx, &mut buf).await.unwrap();

    let request = TaskRequest::ExpectedStats(vec![unit(4, 0, false)]);
    task::send_request(&mut tx, &request).await.unwrap();
    let err = task::recv_stats_results(&mut rx, &mut buf, 1, 2, 1).await.unwrap_err();
    assert!(matches!(err, ProtocolErr::Remote(detail) if detail.contains("unknown dataset 4")));

    let request = TaskRequest::ExpectedStats(vec![unit(0, 0, false)]);
    task::send_request(&mut tx, &request).await.unwrap();
    task::recv_stats_results(&mut rx, &mut buf, 1, 2, 1).await.unwrap();

    task::send_request(&mut tx, &TaskRequest::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn singular_covariances_are_reported() {
    let (mut rx, mut tx, handle) = spawn_worker();
    let mut buf = Vec::new();

    task::send_request(&mut tx, &init()).await.unwrap();
    task::recv_init_ack(&mut rx, &mut buf).await.unwrap();

    let mut singular = unit(0, 0, false);
    singular.covariances = vec![0.0, 1.0];
    task::send_request(&mut tx, &TaskRequest::AssignLabels(vec![singular]))
        .await
        .unwrap();

    let err = task::recv_label_results(&mut rx, &mut buf, 1, false).await.unwrap_err();
    assert!(matches!(err, ProtocolErr::Remote(detail) if detail.contains("positive definite")));

    drop((rx, tx));
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn hang_ups_end_the_worker_cleanly() {
    let (rx, tx, handle) = spawn_worker();
    drop((rx, tx));

    assert_eq!(handle.await.unwrap().unwrap(), 0);
}
