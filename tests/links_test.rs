// Link pools kept consistent through edits and structural changes

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
fn test_linked_edit_fans_out_and_undoes_as_one_step() {
    let mut manager = OpusManager::new();
    manager.link_beats(key(0, 0, 1), key(0, 0, 0)).unwrap();
    manager.link_beats(key(0, 0, 3), key(0, 0, 0)).unwrap();

    manager.split_tree(key(0, 0, 0), &[], 2).unwrap();
    manager.set_event(key(0, 0, 3), &[1], note(7)).unwrap();

    for beat in [0, 1, 3] {
        assert_eq!(event_at(&manager, key(0, 0, beat), &[1]), Some(7));
    }
    assert!(manager.get_tree(key(0, 0, 2), &[]).unwrap().is_leaf());

    manager.apply_undo().unwrap();
    for beat in [0, 1, 3] {
        assert_eq!(event_at(&manager, key(0, 0, beat), &[1]), None);
        assert_eq!(manager.get_tree(key(0, 0, beat), &[]).unwrap().size(), 2);
    }
}

#[test]
fn test_links_follow_inserted_beats() {
    let mut manager = OpusManager::new();
    manager.link_beats(key(0, 0, 1), key(0, 0, 0)).unwrap();
    manager.insert_beat(0, None).unwrap();

    assert_eq!(manager.beat_count(), 5);
    assert!(!manager.is_networked(key(0, 0, 0)));
    assert_eq!(manager.get_all_linked(key(0, 0, 1)), vec![key(0, 0, 1), key(0, 0, 2)]);

    manager.apply_undo().unwrap();
    assert_eq!(manager.beat_count(), 4);
    assert_eq!(manager.get_all_linked(key(0, 0, 0)), vec![key(0, 0, 0), key(0, 0, 1)]);
}

#[test]
fn test_removing_a_beat_drops_its_links() {
    let mut manager = OpusManager::new();
    manager.link_beats(key(0, 0, 1), key(0, 0, 0)).unwrap();
    manager.remove_beat(1).unwrap();

    assert!(!manager.is_networked(key(0, 0, 0)));

    manager.apply_undo().unwrap();
    assert!(manager.is_networked(key(0, 0, 0)));
    assert!(manager.is_networked(key(0, 0, 1)));
}

#[test]
fn test_link_range_rejects_overlap() {
    let mut manager = OpusManager::new();
    let result = manager.link_beat_range(key(0, 0, 1), key(0, 0, 0), key(0, 0, 2));
    assert!(matches!(result, Err(OpusError::LinkRangeOverlap { .. })));

    let result = manager.link_beat_range(key(0, 0, 3), key(0, 0, 0), key(0, 0, 1));
    assert!(matches!(result, Err(OpusError::LinkRangeOverflow { .. })));

    manager.link_beat_range(key(0, 0, 2), key(0, 0, 0), key(0, 0, 1)).unwrap();
    assert_eq!(manager.get_all_linked(key(0, 0, 3)), vec![key(0, 0, 1), key(0, 0, 3)]);
}

#[test]
fn test_unlinked_beat_edits_alone() {
    let mut manager = OpusManager::new();
    manager.link_beats(key(0, 0, 1), key(0, 0, 0)).unwrap();
    manager.set_event(key(0, 0, 1), &[], note(4)).unwrap();
    assert_eq!(event_at(&manager, key(0, 0, 0), &[]), Some(4));

    manager.unlink_beat(key(0, 0, 1));
    assert!(!manager.is_networked(key(0, 0, 0)));

    manager.set_event(key(0, 0, 1), &[], note(5)).unwrap();
    assert_eq!(event_at(&manager, key(0, 0, 0), &[]), Some(4));
    assert_eq!(event_at(&manager, key(0, 0, 1), &[]), Some(5));
}

#[test]
fn test_link_column_includes_every_line() {
    let mut manager = OpusManager::new();
    manager.link_column(key(0, 0, 0), 2).unwrap();

    assert_eq!(
        manager.get_all_linked(key(1, 0, 2)),
        vec![key(0, 0, 0), key(0, 0, 2), key(1, 0, 2)]
    );
    assert!(matches!(manager.link_column(key(0, 0, 0), 9), Err(OpusError::BadBeatIndex(9))));
}

#[test]
fn test_clear_link_pools_by_range() {
    let mut manager = OpusManager::new();
    manager.link_row(key(0, 0, 0), 0, 0).unwrap();
    assert_eq!(manager.get_all_linked(key(0, 0, 3)).len(), 4);

    manager.clear_link_pools_by_range(key(0, 0, 1), key(0, 0, 2)).unwrap();
    assert_eq!(manager.get_all_linked(key(0, 0, 0)), vec![key(0, 0, 0), key(0, 0, 3)]);
    assert!(!manager.is_networked(key(0, 0, 1)));

    manager.apply_undo().unwrap();
    assert_eq!(manager.get_all_linked(key(0, 0, 2)).len(), 4);
}

#[test]
fn test_links_follow_moved_lines() {
    let mut manager = OpusManager::new();
    manager.new_line(0, None).unwrap();
    manager.link_beats(key(0, 1, 0), key(0, 0, 3)).unwrap();

    manager.new_line(0, Some(0)).unwrap();
    assert_eq!(manager.get_all_linked(key(0, 1, 3)), vec![key(0, 1, 3), key(0, 2, 0)]);

    manager.remove_line(0, 1).unwrap();
    assert!(!manager.is_networked(key(0, 1, 0)));
}
