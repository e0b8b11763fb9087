// Undo, redo and rollback of grouped edits

use opus_wasm::models::{BeatKey, OpusEvent};
use opus_wasm::opusmanager::{OpusError, OpusManager};

fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
    BeatKey::new(channel, line_offset, beat)
}

fn note(value: i32) -> OpusEvent {
    OpusEvent::absolute(value, 12, 0)
}

fn event_at(manager: &OpusManager, beat_key: BeatKey, position: &[usize]) -> Option<i32> {
    manager
        .get_tree(beat_key, position)
        .unwrap()
        .event()
        .map(|event| event.note)
}

#[test]
fn test_failed_batch_rolls_back() {
    let mut manager = OpusManager::new();
    manager.set_event(key(0, 0, 0), &[], note(3)).unwrap();

    let pairs = [(key(0, 0, 1), key(0, 0, 0)), (key(0, 0, 2), key(0, 0, 2))];
    let result = manager.batch_link_beats(&pairs);

    assert!(matches!(result, Err(OpusError::SelfLink(_))));
    assert!(!manager.is_networked(key(0, 0, 1)));
    assert_eq!(event_at(&manager, key(0, 0, 1), &[]), None);

    // only the set_event remains to undo
    assert!(manager.apply_undo().unwrap());
    assert!(!manager.apply_undo().unwrap());
}

#[test]
fn test_redo_reapplies_undone_edit() {
    let mut manager = OpusManager::new();
    manager.split_tree(key(0, 0, 1), &[], 3).unwrap();
    manager.set_event(key(0, 0, 1), &[2], note(9)).unwrap();

    manager.apply_undo().unwrap();
    assert_eq!(event_at(&manager, key(0, 0, 1), &[2]), None);
    assert!(manager.can_redo());

    manager.apply_redo().unwrap();
    assert_eq!(event_at(&manager, key(0, 0, 1), &[2]), Some(9));
}

#[test]
fn test_history_size_is_bounded() {
    let mut manager = OpusManager::with_history_size(2);
    manager.set_tempo(100.0);
    manager.set_tempo(110.0);
    manager.set_tempo(130.0);

    assert!(manager.apply_undo().unwrap());
    assert!(manager.apply_undo().unwrap());
    assert!(!manager.apply_undo().unwrap());
    assert_eq!(manager.tempo(), 100.0);
}

#[test]
fn test_new_edit_clears_redo() {
    let mut manager = OpusManager::new();
    manager.set_tempo(90.0);
    manager.apply_undo().unwrap();
    assert!(manager.can_redo());

    manager.set_transpose(1);
    assert!(!manager.can_redo());
    assert!(!manager.apply_redo().unwrap());
}

#[test]
fn test_undo_line_removal_restores_percussion_instrument() {
    let mut manager = OpusManager::new();
    let percussion = manager.percussion_channel().unwrap();
    let line = manager.new_line(percussion, None).unwrap();
    manager.set_percussion_instrument(line, 5).unwrap();
    manager.set_percussion_event(key(percussion, line, 0), &[]).unwrap();

    manager.remove_line(percussion, line).unwrap();
    manager.apply_undo().unwrap();

    assert_eq!(manager.get_percussion_instrument(line), 5);
    assert_eq!(event_at(&manager, key(percussion, line, 0), &[]), Some(5));
}

#[test]
fn test_undo_of_grouped_beat_insertions() {
    let mut manager = OpusManager::new();
    manager.insert_beats(1, 3).unwrap();
    assert_eq!(manager.beat_count(), 7);

    manager.apply_undo().unwrap();
    assert_eq!(manager.beat_count(), 4);
    assert!(!manager.has_history());
}
