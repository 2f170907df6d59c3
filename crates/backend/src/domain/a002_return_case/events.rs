use contracts::domain::a002_return_case::events::CaseRowEvent;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Сколько последних событий держим в ленте
const BUFFER_CAPACITY: usize = 256;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);
static EVENT_BUFFER: Lazy<Mutex<VecDeque<CaseRowEvent>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)));

/// Опубликовать построчное событие после применённой команды
///
/// Лента — кольцевой буфер в памяти: при переполнении старые события
/// вытесняются. Подписчик, отставший дальше ёмкости буфера, обязан
/// восстановить истину через getCase.
pub fn publish(mut event: CaseRowEvent) -> u64 {
    let seq = EVENT_SEQ.fetch_add(1, Ordering::SeqCst) + 1;
    event.seq = seq;

    let mut buffer = EVENT_BUFFER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if buffer.len() == BUFFER_CAPACITY {
        buffer.pop_front();
    }
    buffer.push_back(event);
    seq
}

/// События с номерами строго больше `after_seq`
pub fn list_after(after_seq: u64) -> Vec<CaseRowEvent> {
    let buffer = EVENT_BUFFER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    buffer
        .iter()
        .filter(|e| e.seq > after_seq)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_publish_assigns_monotonic_seq() {
        let parcel_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();

        let s1 = publish(CaseRowEvent::for_case(parcel_id, case_id, 1));
        let s2 = publish(CaseRowEvent::for_case(parcel_id, case_id, 2));
        assert!(s2 > s1);

        // Лента общая для процесса — фильтруем по заявке
        let mine: Vec<_> = list_after(s1)
            .into_iter()
            .filter(|e| e.case_id == case_id.to_string())
            .collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].seq, s2);
        assert_eq!(mine[0].version, 2);
    }

    #[test]
    fn test_list_after_skips_already_seen() {
        let case_id = Uuid::new_v4();
        let seq = publish(CaseRowEvent::for_case(Uuid::new_v4(), case_id, 1));
        assert!(list_after(seq)
            .into_iter()
            .all(|e| e.case_id != case_id.to_string()));
    }
}
