//! Project files
//!
//! An opus is stored as JSON: project settings, one entry per channel with its
//! MIDI assignment, each line as `|`-joined beat strings, and the link pools.
//! Loading parses the whole document before touching the active opus.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::core::OpusManagerCore;
use super::errors::{OpusError, Result};
use super::manager::OpusManager;
use crate::models::{BeatKey, BeatTree, OpusChannel, OpusEvent, OpusLine};
use crate::parse::{check_radix, line_from_string, line_to_string};
use crate::renderers::midi::defaults::{DEFAULT_PERCUSSION, DEFAULT_VOLUME, PERCUSSION_MIDI_CHANNEL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub midi_channel: u8,
    pub midi_bank: u8,
    pub midi_program: u8,
    pub lines: Vec<String>,
    #[serde(default)]
    pub line_volumes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub name: String,
    pub tempo: f32,
    pub radix: u32,
    #[serde(default)]
    pub transpose: i32,
    pub channels: Vec<ChannelData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflections: Option<Vec<Vec<BeatKey>>>,
}

impl OpusManager {
    pub fn to_project_data(&self) -> Result<ProjectData> {
        let core = &self.core;
        let radix = core.radix();
        let channels = core
            .channels()
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                let lines = channel
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(line_offset, line)| -> Result<String> {
                        if core.is_percussion(index) {
                            let instrument = core.get_percussion_instrument(line_offset);
                            let beats: Vec<BeatTree> = line
                                .beats
                                .iter()
                                .map(|beat| {
                                    beat.copy_with(beat.root(), &|event: &OpusEvent| OpusEvent {
                                        note: instrument,
                                        ..*event
                                    })
                                })
                                .collect();
                            Ok(line_to_string(&beats, radix)?)
                        } else {
                            Ok(line_to_string(&line.beats, radix)?)
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(ChannelData {
                    midi_channel: channel.midi_channel,
                    midi_bank: channel.midi_bank,
                    midi_program: channel.midi_program,
                    lines,
                    line_volumes: channel.lines.iter().map(|line| line.volume).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let reflections = if self.links.is_empty() {
            None
        } else {
            Some(
                self.links
                    .pools()
                    .iter()
                    .map(|pool| pool.iter().copied().collect())
                    .collect(),
            )
        };

        Ok(ProjectData {
            name: core.project_name().to_string(),
            tempo: core.tempo(),
            radix,
            transpose: core.transpose(),
            channels,
            reflections,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_project_data()?)?)
    }

    /// Replace the active opus with a serialised one. Nothing changes if parsing fails.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let data: ProjectData = serde_json::from_str(json)?;
        self.load_project_data(data)
    }

    pub fn load_project_data(&mut self, data: ProjectData) -> Result<()> {
        let (core, channel_map) = core_from_project(&data)?;
        self.core = core;
        self.reset_session();

        for pool in data.reflections.unwrap_or_default() {
            let Some(pool) = pool
                .into_iter()
                .map(|key| {
                    channel_map
                        .get(key.channel)
                        .map(|channel| BeatKey::new(*channel, key.line_offset, key.beat))
                })
                .collect::<Option<Vec<_>>>()
            else {
                log::warn!("dropping link pool referring to a missing channel");
                continue;
            };
            if let Some(missing) = pool.iter().find(|key| self.core.get_beat_tree(**key).is_err()) {
                log::warn!("dropping link pool referring to missing beat {}", missing);
                continue;
            }
            self.links.create_pool(pool);
        }
        log::info!(
            "loaded \"{}\": {} channels, {} beats",
            self.core.project_name(),
            self.core.channels().len(),
            self.core.beat_count()
        );
        Ok(())
    }

    /// Write the project to `path`, or to the path it was last saved to or loaded from
    pub fn save(&mut self, path: Option<&Path>) -> Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.core.path().cloned())
            .ok_or(OpusError::EmptyPath)?;
        fs::write(&path, self.to_json()?)?;
        log::info!("saved project to {}", path.display());
        self.core.set_path(Some(path));
        self.mark_saved();
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        let json = fs::read_to_string(path)?;
        self.load_json(&json)?;
        self.core.set_path(Some(path.to_path_buf()));
        Ok(())
    }
}

/// Build a complete opus from project data without touching any live state.
/// Also returns where each channel of the file ended up, since the percussion
/// channel is always moved last.
fn core_from_project(data: &ProjectData) -> Result<(OpusManagerCore, Vec<usize>)> {
    check_radix(data.radix)?;
    let mut parsed = Vec::with_capacity(data.channels.len());
    for channel in &data.channels {
        let lines = channel
            .lines
            .iter()
            .map(|line| line_from_string(line, data.radix, channel.midi_channel))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        parsed.push(lines);
    }

    let beat_count = parsed
        .iter()
        .flat_map(|lines| lines.iter().map(Vec::len))
        .max()
        .unwrap_or(1)
        .max(1);

    let mut core = OpusManagerCore::default();
    core.set_radix(data.radix)?;
    core.set_beat_count(beat_count);
    core.set_tempo(data.tempo);
    core.set_transpose(data.transpose);
    core.set_project_name(data.name.clone());

    let percussion_index = data
        .channels
        .iter()
        .position(|channel| channel.midi_channel == PERCUSSION_MIDI_CHANNEL);

    let mut percussion = OpusChannel::new_percussion(0, beat_count);
    percussion.midi_channel = PERCUSSION_MIDI_CHANNEL;
    if let Some(index) = percussion_index {
        let source = &data.channels[index];
        percussion.set_instrument(source.midi_bank, source.midi_program);
        fill_lines(&mut percussion, &parsed[index], &source.line_volumes, true);
    } else {
        fill_lines(&mut percussion, &[], &[], true);
    }
    core.insert_channel(0, percussion)?;

    let pitched_count = data.channels.len() - usize::from(percussion_index.is_some());
    let mut channel_map = vec![pitched_count; data.channels.len()];
    let mut uuid = 1;
    for (index, source) in data.channels.iter().enumerate() {
        if Some(index) == percussion_index {
            continue;
        }
        channel_map[index] = uuid as usize - 1;
        let mut channel = OpusChannel::new(uuid, beat_count);
        channel.midi_channel = source.midi_channel;
        channel.set_instrument(source.midi_bank, source.midi_program);
        fill_lines(&mut channel, &parsed[index], &source.line_volumes, false);
        core.insert_channel(uuid as usize - 1, channel)?;
        uuid += 1;
    }

    Ok((core, channel_map))
}

fn fill_lines(channel: &mut OpusChannel, lines: &[Vec<BeatTree>], volumes: &[u8], percussion: bool) {
    for (offset, beats) in lines.iter().enumerate() {
        let mut line = OpusLine::new(0);
        line.beats = beats.clone();
        line.volume = volumes.get(offset).copied().unwrap_or(DEFAULT_VOLUME);

        let instrument = percussion.then(|| {
            beats
                .iter()
                .flat_map(|beat| beat.get_events_mapped(beat.root()))
                .map(|(_, event)| event.note)
                .next()
                .unwrap_or(DEFAULT_PERCUSSION)
        });
        channel.insert_line(offset, line, instrument);
    }
    if channel.line_count() == 0 {
        channel.new_line(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ParseError;

    fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
        BeatKey::new(channel, line_offset, beat)
    }

    #[test]
    fn test_json_round_trip() {
        let mut manager = OpusManager::new();
        manager.set_project_name("Round Trip");
        manager.set_transpose(3);
        manager.split_tree(key(0, 0, 0), &[], 2).unwrap();
        manager.set_event(key(0, 0, 0), &[1], OpusEvent::absolute(26, 12, 0)).unwrap();
        manager.set_percussion_instrument(0, 5).unwrap();
        manager.set_percussion_event(key(1, 0, 2), &[]).unwrap();
        manager.link_beats(key(0, 0, 3), key(0, 0, 1)).unwrap();

        let json = manager.to_json().unwrap();
        let mut loaded = OpusManager::new();
        loaded.load_json(&json).unwrap();

        assert_eq!(loaded.project_name(), "Round Trip");
        assert_eq!(loaded.transpose(), 3);
        assert_eq!(loaded.get_beat_tree(key(0, 0, 0)).unwrap(), manager.get_beat_tree(key(0, 0, 0)).unwrap());
        assert_eq!(loaded.get_percussion_instrument(0), 5);
        assert!(loaded.is_networked(key(0, 0, 3)));
        assert!(!loaded.has_history());
    }

    #[test]
    fn test_percussion_placed_last() {
        let json = r#"{
            "name": "drums first",
            "tempo": 100.0,
            "radix": 12,
            "channels": [
                {"midi_channel": 9, "midi_bank": 128, "midi_program": 0, "lines": ["03|__"]},
                {"midi_channel": 0, "midi_bank": 0, "midi_program": 4, "lines": ["10|[11,12]", "__|__"]}
            ]
        }"#;
        let mut manager = OpusManager::new();
        manager.load_json(json).unwrap();

        assert_eq!(manager.channels().len(), 2);
        assert_eq!(manager.channels()[0].midi_program, 4);
        assert!(manager.channels()[1].is_percussion());
        assert_eq!(manager.get_percussion_instrument(0), 3);
        assert_eq!(manager.beat_count(), 2);
        assert_eq!(manager.get_line_volume(0, 1).unwrap(), DEFAULT_VOLUME);
    }

    #[test]
    fn test_reflections_follow_relocated_channels() {
        let json = r#"{
            "name": "drums first",
            "tempo": 100.0,
            "radix": 12,
            "channels": [
                {"midi_channel": 9, "midi_bank": 128, "midi_program": 0, "lines": ["03|__"]},
                {"midi_channel": 0, "midi_bank": 0, "midi_program": 4, "lines": ["10|[11,12]", "__|10"]}
            ],
            "reflections": [[
                {"channel": 1, "line_offset": 0, "beat": 0},
                {"channel": 1, "line_offset": 1, "beat": 1}
            ]]
        }"#;
        let mut manager = OpusManager::new();
        manager.load_json(json).unwrap();

        assert_eq!(manager.get_all_linked(key(0, 0, 0)), vec![key(0, 0, 0), key(0, 1, 1)]);
        assert!(!manager.is_networked(key(1, 0, 0)));
    }

    #[test]
    fn test_reflection_on_unknown_channel_is_dropped() {
        let json = r#"{
            "name": "x", "tempo": 100.0, "radix": 12,
            "channels": [{"midi_channel": 0, "midi_bank": 0, "midi_program": 0, "lines": ["10|10"]}],
            "reflections": [[
                {"channel": 0, "line_offset": 0, "beat": 0},
                {"channel": 4, "line_offset": 0, "beat": 1}
            ]]
        }"#;
        let mut manager = OpusManager::new();
        manager.load_json(json).unwrap();
        assert!(!manager.is_networked(key(0, 0, 0)));
    }

    #[test]
    fn test_events_saved_in_project_radix() {
        let mut manager = OpusManager::new();
        manager.set_event(key(0, 0, 0), &[], OpusEvent::absolute(26, 10, 0)).unwrap();
        let data = manager.to_project_data().unwrap();
        assert_eq!(data.channels[0].lines[0], "22|__|__|__");

        let mut loaded = OpusManager::new();
        loaded.load_json(&manager.to_json().unwrap()).unwrap();
        let event = loaded.get_tree(key(0, 0, 0), &[]).unwrap().event().copied();
        assert_eq!(event.map(|event| event.note), Some(26));
    }

    #[test]
    fn test_oversized_number_fails_load() {
        let mut manager = OpusManager::new();
        manager.set_event(key(0, 0, 0), &[], OpusEvent::absolute(1, 12, 0)).unwrap();
        let json = r#"{"name": "x", "tempo": 1.0, "radix": 12, "channels": [{"midi_channel": 0, "midi_bank": 0, "midi_program": 0, "lines": ["BBBBBBBBBBBBBBBB"]}]}"#;

        assert!(matches!(
            manager.load_json(json),
            Err(OpusError::Parse(ParseError::NumberTooLarge(0)))
        ));
        assert!(manager.get_tree(key(0, 0, 0), &[]).unwrap().is_event());
    }

    #[test]
    fn test_unsupported_radix_fails_load() {
        let mut manager = OpusManager::new();
        for radix in [0, 1, 37] {
            let json = format!(
                r#"{{"name": "x", "tempo": 1.0, "radix": {}, "channels": []}}"#,
                radix
            );
            assert!(matches!(
                manager.load_json(&json),
                Err(OpusError::Parse(ParseError::UnsupportedRadix(_)))
            ));
        }
        assert_eq!(manager.radix(), 12);
    }

    #[test]
    fn test_bad_json_keeps_active_opus() {
        let mut manager = OpusManager::new();
        manager.set_event(key(0, 0, 0), &[], OpusEvent::absolute(1, 12, 0)).unwrap();
        let bad = r#"{"name": "x", "tempo": 1.0, "radix": 12, "channels": [{"midi_channel": 0, "midi_bank": 0, "midi_program": 0, "lines": ["[10,"]}]}"#;

        assert!(matches!(manager.load_json(bad), Err(OpusError::Parse(_))));
        assert!(manager.get_tree(key(0, 0, 0), &[]).unwrap().is_event());
        assert!(manager.has_history());
    }

    #[test]
    fn test_save_without_path() {
        let mut manager = OpusManager::new();
        assert!(matches!(manager.save(None), Err(OpusError::EmptyPath)));
    }
}
