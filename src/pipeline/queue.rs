//! Cancellable push/pop on the bounded pipeline queues.
//!
//! Both operations select on the queue and the cancel signal together, so a full or empty
//! queue never hides a shutdown request.

use crossbeam_channel::{Receiver, Select, Sender};

use super::signal::Signal;

/// Why a push did not enqueue its item.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    Cancelled,
    /// Every receiver is gone.
    Closed,
}

/// Result of a cancellable pop.
#[derive(Debug)]
pub enum Popped<T> {
    Item(T),
    /// Queue is empty and all senders are gone (end of stream).
    Closed,
    Cancelled,
}

/// Push `item`, blocking while the queue is full until it is accepted or `cancel` fires.
pub fn push_or_cancel<T>(tx: &Sender<T>, item: T, cancel: &Signal) -> Result<(), PushError> {
    if cancel.is_fired() {
        return Err(PushError::Cancelled);
    }
    let mut sel = Select::new();
    let send_idx = sel.send(tx);
    let cancel_idx = sel.recv(cancel.receiver());
    let oper = sel.select();
    match oper.index() {
        i if i == send_idx => oper.send(tx, item).map_err(|_| PushError::Closed),
        i if i == cancel_idx => {
            let _ = oper.recv(cancel.receiver());
            Err(PushError::Cancelled)
        }
        _ => unreachable!(),
    }
}

/// Pop one item, blocking while the queue is empty until an item arrives, the queue closes, or `cancel` fires.
pub fn pop_or_cancel<T>(rx: &Receiver<T>, cancel: &Signal) -> Popped<T> {
    if cancel.is_fired() {
        return Popped::Cancelled;
    }
    let mut sel = Select::new();
    let recv_idx = sel.recv(rx);
    let cancel_idx = sel.recv(cancel.receiver());
    let oper = sel.select();
    match oper.index() {
        i if i == recv_idx => match oper.recv(rx) {
            Ok(item) => Popped::Item(item),
            Err(_) => Popped::Closed,
        },
        i if i == cancel_idx => {
            let _ = oper.recv(cancel.receiver());
            Popped::Cancelled
        }
        _ => unreachable!(),
    }
}

/// Drop everything currently queued. Returns how many items were discarded.
pub fn drain<T, F>(rx: &Receiver<T>, mut on_item: F) -> usize
where
    F: FnMut(T),
{
    let mut n = 0;
    for item in rx.try_iter() {
        on_item(item);
        n += 1;
    }
    n
}
