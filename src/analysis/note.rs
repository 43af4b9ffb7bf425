// Frequency to note mapping (equal temperament, A4 = 440 Hz)

use serde::Serialize;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub const A4_HZ: f32 = 440.0;

/// Placeholder shown when there is no pitch.
pub const NO_NOTE: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoteInfo {
    pub name: &'static str,
    pub octave: i32,
    /// Deviation from the nearest semitone, -50..=50
    pub cents: i32,
}

/// Map a frequency to its nearest note. Returns `None` for non-positive input.
pub fn frequency_to_note(frequency: f32) -> Option<NoteInfo> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    let semitones = 12.0 * (f64::from(frequency) / f64::from(A4_HZ)).log2();
    let nearest = semitones.round();
    let steps = nearest as i32;

    let index = (steps + 9).rem_euclid(12) as usize;
    let octave = (steps + 9).div_euclid(12) + 4;
    let cents = ((semitones - nearest) * 100.0).round() as i32;

    Some(NoteInfo {
        name: NOTE_NAMES[index],
        octave,
        cents,
    })
}
