use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::error::ProtoError;
use crate::proto::{encode_line, parse_line, Inbound, Outbound};

/// 入站线程：逐行解析并转发；收到关闭信号后停止转发，EOF 时关闭通道。
pub fn spawn_line_reader<R>(
    input: R,
    inbound_tx: SyncSender<Inbound>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("Link read error: {:?}", err);
                    break;
                }
            };
            match parse_line(&line) {
                Ok(message) => {
                    if inbound_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(ProtoError::Empty) => {}
                Err(err) => log::warn!("Skipping inbound line: {}", err),
            }
        }
        log::info!("Inbound link closed");
    })
}

/// 出站线程：每条消息写一行并立即刷新，所有发送端关闭后退出。
pub fn spawn_line_writer<W>(mut output: W, outbound_rx: Receiver<Outbound>) -> thread::JoinHandle<()>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        while let Ok(message) = outbound_rx.recv() {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("Outbound encode failed: {:?}", err);
                    continue;
                }
            };
            if let Err(err) = writeln!(output, "{}", line).and_then(|_| output.flush()) {
                log::warn!("Outbound write failed: {:?}", err);
                break;
            }
        }
    })
}
