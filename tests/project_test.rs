// Saving and loading JSON project files

use opus_wasm::models::{BeatKey, OpusEvent};
use opus_wasm::opusmanager::{OpusManager, ProjectData};

fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
    BeatKey::new(channel, line_offset, beat)
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.json");

    let mut manager = OpusManager::new();
    manager.set_tempo(96.0);
    manager.split_tree(key(0, 0, 1), &[], 3).unwrap();
    manager.set_event(key(0, 0, 1), &[1], OpusEvent::absolute(30, 12, 0)).unwrap();
    manager.set_line_volume(0, 0, 100).unwrap();

    manager.save(Some(&path)).unwrap();
    assert!(!manager.has_changed_since_save());
    assert_eq!(manager.path(), Some(&path));

    let mut loaded = OpusManager::new();
    loaded.load(&path).unwrap();
    assert_eq!(loaded.tempo(), 96.0);
    assert_eq!(loaded.get_line_volume(0, 0).unwrap(), 100);
    assert_eq!(loaded.get_beat_tree(key(0, 0, 1)).unwrap(), manager.get_beat_tree(key(0, 0, 1)).unwrap());
    assert_eq!(loaded.path(), Some(&path));

    manager.set_transpose(1);
    assert!(manager.has_changed_since_save());
    manager.save(None).unwrap();
    assert!(!manager.has_changed_since_save());
}

#[test]
fn test_project_data_shape() {
    let mut manager = OpusManager::new();
    manager.set_event(key(0, 0, 0), &[], OpusEvent::absolute(13, 12, 0)).unwrap();

    let json = manager.to_json().unwrap();
    let data: ProjectData = serde_json::from_str(&json).unwrap();

    assert_eq!(data.radix, 12);
    assert_eq!(data.channels.len(), 2);
    assert_eq!(data.channels[0].lines, vec!["11|__|__|__".to_string()]);
    assert_eq!(data.channels[1].midi_channel, 9);
    assert!(data.reflections.is_none());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = OpusManager::new();
    assert!(manager.load(&dir.path().join("missing.json")).is_err());
    assert_eq!(manager.beat_count(), 4);
}

#[test]
fn test_reload_keeps_every_beat() {
    let mut manager = OpusManager::new();
    let second = manager.new_channel(None, 1, None).unwrap();
    manager.new_line(0, None).unwrap();
    let midi_channel = manager.channels()[0].midi_channel;
    let second_midi = manager.channels()[second].midi_channel;

    manager.split_tree(key(0, 0, 0), &[], 2).unwrap();
    manager.split_tree(key(0, 0, 0), &[1], 3).unwrap();
    manager.set_event(key(0, 0, 0), &[0], OpusEvent::absolute(36, 12, midi_channel)).unwrap();
    manager.set_event(key(0, 0, 0), &[1, 2], OpusEvent::relative(-2, 12, midi_channel)).unwrap();
    manager.set_event(key(0, 0, 2), &[], OpusEvent::relative(24, 12, midi_channel)).unwrap();
    manager.set_event(key(0, 1, 3), &[], OpusEvent::absolute(7, 12, midi_channel)).unwrap();

    manager.split_tree(key(second, 0, 1), &[], 3).unwrap();
    manager.set_event(key(second, 0, 1), &[2], OpusEvent::absolute(50, 12, second_midi)).unwrap();
    manager.set_line_volume(second, 0, 40).unwrap();

    let percussion = manager.channels().len() - 1;
    manager.new_line(percussion, None).unwrap();
    manager.set_percussion_instrument(0, 3).unwrap();
    manager.set_percussion_instrument(1, 8).unwrap();
    manager.split_tree(key(percussion, 0, 0), &[], 2).unwrap();
    manager.set_percussion_event(key(percussion, 0, 0), &[1]).unwrap();
    manager.set_percussion_event(key(percussion, 1, 3), &[]).unwrap();

    let mut loaded = OpusManager::new();
    loaded.load_json(&manager.to_json().unwrap()).unwrap();

    assert_eq!(loaded.beat_count(), manager.beat_count());
    assert_eq!(loaded.get_channel_line_counts(), manager.get_channel_line_counts());
    for (channel, lines) in manager.get_channel_line_counts().into_iter().enumerate() {
        for line_offset in 0..lines {
            for beat in 0..manager.beat_count() {
                let beat_key = key(channel, line_offset, beat);
                assert_eq!(
                    loaded.get_beat_tree(beat_key).unwrap(),
                    manager.get_beat_tree(beat_key).unwrap(),
                    "beat {} differs after reload",
                    beat_key
                );
            }
        }
    }
    assert_eq!(loaded.get_line_volume(second, 0).unwrap(), 40);
    assert_eq!(loaded.get_percussion_instrument(0), 3);
    assert_eq!(loaded.get_percussion_instrument(1), 8);
    assert_eq!(loaded.to_json().unwrap(), manager.to_json().unwrap());
}
