use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::cache::SnapshotCache;
use crate::config::GatewaySettings;
use crate::device_service::ChannelDeviceService;
use crate::error::ReaderError;
use crate::link::{spawn_line_reader, spawn_line_writer};
use crate::model::{ReportInfo, StaticTag};
use crate::processor::TagProcessor;
use crate::proto::{Inbound, Outbound};
use crate::publish::{spawn_event_forwarder, EventPublisher};
use crate::reader_group::ReaderGroup;

/// 设备命令写入出站队列的最长等待。
const DEVICE_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
/// 队列轮询间隔（用于检查关闭信号）。
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const SWEEP_TICK: Duration = Duration::from_millis(250);

/// 网关核心：处理器 + 读写器组 + 发布与持久化。
pub struct Gateway {
    processor: TagProcessor,
    group: ReaderGroup,
    service: Arc<ChannelDeviceService>,
    publisher: EventPublisher,
    outbound: SyncSender<Outbound>,
    cache: SnapshotCache,
    dirty: AtomicBool,
}

impl Gateway {
    pub fn new(
        settings: &GatewaySettings,
        publisher: EventPublisher,
        outbound: SyncSender<Outbound>,
    ) -> Self {
        let service = Arc::new(ChannelDeviceService::new(
            outbound.clone(),
            DEVICE_COMMAND_TIMEOUT,
        ));
        Self {
            processor: TagProcessor::new(settings.processor.clone()),
            group: ReaderGroup::new(service.clone(), settings.trust_vendor_complete_reports),
            service,
            publisher,
            outbound,
            cache: SnapshotCache::new(settings.cache_path.clone()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn processor(&self) -> &TagProcessor {
        &self.processor
    }

    pub fn group(&self) -> &ReaderGroup {
        &self.group
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// 启动时从快照文件恢复库存。
    pub fn restore_from_cache(&self) {
        let tags = self.cache.load_or_empty();
        if !tags.is_empty() {
            self.processor.restore(&tags);
        }
    }

    fn report_error(&self, message: String) {
        log::warn!("{}", message);
        if self.outbound.try_send(Outbound::Error { message }).is_err() {
            log::warn!("Outbound queue unavailable, error not reported");
        }
    }

    /// 处理一条入站消息；任何错误都不会中断调用方的循环。
    pub fn handle(&self, message: Inbound) {
        match message {
            Inbound::Report {
                device,
                origin_ns,
                report,
            } => {
                let mut readings = report.decode_readings(&device);
                if readings.is_empty() {
                    return;
                }
                match self.group.process_tag_report(&device, &mut readings) {
                    Ok(()) => {}
                    Err(ReaderError::UnknownReader(_)) => {
                        log::debug!("Report from unmanaged reader {}", device);
                    }
                    Err(err) => log::warn!("Report preprocessing for {} failed: {}", device, err),
                }
                let events = self
                    .processor
                    .process_report(ReportInfo::new(device, origin_ns), &readings);
                if !events.is_empty() {
                    self.dirty.store(true, Ordering::Release);
                    self.publisher.publish(events);
                }
            }
            Inbound::ReaderConnected {
                device,
                capabilities,
            } => {
                self.service.remember_capabilities(&device, capabilities);
                if let Err(err) = self.group.add_reader(&device) {
                    self.report_error(format!("reader {} not added: {}", device, err));
                }
            }
            Inbound::ReaderClosed { device } => {
                self.group.remove_reader(&device);
                self.service.forget(&device);
            }
            Inbound::SetBehavior { behavior } => {
                if let Err(err) = self.group.set_behavior(behavior) {
                    self.report_error(format!("set behavior: {}", err));
                }
            }
            Inbound::SetEnvironment { environment } => {
                if let Err(err) = self.group.set_environment(environment) {
                    self.report_error(format!("set environment: {}", err));
                }
            }
            Inbound::StartAll => {
                if let Err(err) = self.group.start_all() {
                    self.report_error(format!("start all: {}", err));
                }
            }
            Inbound::StopAll => {
                if let Err(err) = self.group.stop_all() {
                    self.report_error(format!("stop all: {}", err));
                }
            }
            Inbound::UpdateConfig { config } => {
                if let Err(err) = self.processor.update_config(config) {
                    self.report_error(format!("update config: {}", err));
                }
            }
            Inbound::Snapshot => {
                let tags = self.processor.snapshot();
                if self.outbound.send(Outbound::Inventory { tags }).is_err() {
                    log::warn!("Outbound link closed, snapshot not sent");
                }
            }
        }
    }

    /// 离开检查；库存有变化时持久化。
    pub fn sweep_departed(&self, now_ms: i64) {
        let (events, snapshot) = self.processor.aggregate_departed(now_ms);
        self.publisher.publish(events);
        if let Some(tags) = snapshot {
            self.persist(&tags);
        }
    }

    pub fn sweep_age_out(&self, now_ms: i64) {
        let (_, snapshot) = self.processor.age_out(now_ms);
        if let Some(tags) = snapshot {
            self.persist(&tags);
        }
    }

    /// 上报处理产生过事件时写一次快照。
    pub fn flush_if_dirty(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.persist(&self.processor.snapshot());
        }
    }

    /// 关闭前的最终持久化。
    pub fn flush(&self) {
        self.dirty.store(false, Ordering::Release);
        self.persist(&self.processor.snapshot());
    }

    fn persist(&self, tags: &[StaticTag]) {
        if let Err(err) = self.cache.persist(tags) {
            log::warn!("Persisting tag cache failed: {}", err);
            self.dirty.store(true, Ordering::Release);
        }
    }
}

/// 当前时间（毫秒）。
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 同一读写器总是落到同一个工作线程，保证上报顺序。
pub fn worker_index(device: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

/// 启动工作线程：队列关闭且排空后退出。
pub fn spawn_workers(
    gateway: Arc<Gateway>,
    count: usize,
    capacity: usize,
) -> (Vec<SyncSender<Inbound>>, Vec<thread::JoinHandle<()>>) {
    let mut senders = Vec::with_capacity(count);
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        let (tx, rx) = mpsc::sync_channel::<Inbound>(capacity);
        let gateway = gateway.clone();
        senders.push(tx);
        handles.push(thread::spawn(move || {
            loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(message) => gateway.handle(message),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("Worker {} drained", id);
        }));
    }
    (senders, handles)
}

/// 分发循环：按读写器分配到工作线程，控制消息就地处理。
///
/// 收到关闭信号或入站链路关闭时返回，并置位关闭信号。
/// 关闭时已进入入站队列的消息仍会分发完，随工作线程一起排空。
pub fn run_dispatcher(
    gateway: &Gateway,
    inbound_rx: Receiver<Inbound>,
    workers: Vec<SyncSender<Inbound>>,
    shutdown: &AtomicBool,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            let mut pending = 0;
            for message in inbound_rx.try_iter() {
                if !dispatch(gateway, &workers, message) {
                    break;
                }
                pending += 1;
            }
            if pending > 0 {
                log::info!("Dispatched {} queued message(s) after shutdown", pending);
            }
            break;
        }
        let message = match inbound_rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !dispatch(gateway, &workers, message) {
            break;
        }
    }
    shutdown.store(true, Ordering::SeqCst);
}

/// 分发一条消息；工作队列已关闭时返回 false。
fn dispatch(gateway: &Gateway, workers: &[SyncSender<Inbound>], message: Inbound) -> bool {
    let index = match message.device() {
        Some(device) if !workers.is_empty() => Some(worker_index(device, workers.len())),
        _ => None,
    };
    match index {
        Some(index) => {
            if workers[index].send(message).is_err() {
                log::warn!("Worker queue closed");
                return false;
            }
        }
        None => gateway.handle(message),
    }
    true
}

/// 周期任务：离开检查、老化清理、脏快照落盘。
pub fn spawn_sweeper(
    gateway: Arc<Gateway>,
    age_out_interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_departed = Instant::now();
        let mut last_age_out = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(SWEEP_TICK);
            // 每轮读取最新配置，支持热更新
            let departed_interval = Duration::from_secs(
                gateway.processor().config().departed_check_interval_seconds as u64,
            );
            if last_departed.elapsed() >= departed_interval {
                gateway.sweep_departed(now_millis());
                gateway.flush_if_dirty();
                last_departed = Instant::now();
            }
            if last_age_out.elapsed() >= age_out_interval {
                gateway.sweep_age_out(now_millis());
                last_age_out = Instant::now();
            }
        }
    })
}

/// 运行完整网关直到关闭：链路 → 分发 → 工作线程 → 发布，最后持久化快照。
pub fn run<R, W>(settings: GatewaySettings, input: R, output: W, shutdown: Arc<AtomicBool>)
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Outbound>(settings.event_queue_capacity);
    let (event_tx, event_rx) = mpsc::sync_channel(settings.event_queue_capacity);
    let (inbound_tx, inbound_rx) = mpsc::sync_channel::<Inbound>(settings.report_queue_capacity);

    let writer = spawn_line_writer(output, outbound_rx);
    let forwarder = spawn_event_forwarder(event_rx, outbound_tx.clone());

    let gateway = Arc::new(Gateway::new(
        &settings,
        EventPublisher::new(event_tx),
        outbound_tx,
    ));
    gateway.restore_from_cache();
    log::info!(
        "Gateway {} running with {} worker(s), {} tag(s) restored",
        settings.gateway_id,
        settings.worker_count,
        gateway.processor().tag_count()
    );

    // 读线程可能阻塞在输入上，不等待其退出
    let _reader = spawn_line_reader(input, inbound_tx, shutdown.clone());
    let (workers, worker_handles) = spawn_workers(
        gateway.clone(),
        settings.worker_count,
        settings.report_queue_capacity,
    );
    let sweeper = spawn_sweeper(
        gateway.clone(),
        Duration::from_secs(settings.age_out_check_interval_seconds as u64),
        shutdown.clone(),
    );

    run_dispatcher(&gateway, inbound_rx, workers, &shutdown);
    log::info!("Shutting down, draining workers");

    for handle in worker_handles {
        if handle.join().is_err() {
            log::warn!("Worker thread panicked");
        }
    }
    if sweeper.join().is_err() {
        log::warn!("Sweeper thread panicked");
    }
    gateway.flush();
    let dropped = gateway.publisher().dropped_batches();
    if dropped > 0 {
        log::warn!("{} event batch(es) were dropped", dropped);
    }

    // 释放所有发送端后，转发与写线程自然退出
    drop(gateway);
    if forwarder.join().is_err() {
        log::warn!("Event forwarder panicked");
    }
    if writer.join().is_err() {
        log::warn!("Link writer panicked");
    }
    log::info!("Gateway stopped");
}
