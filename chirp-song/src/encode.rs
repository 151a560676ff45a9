//! Song URL encoder
//!
//! The mirror image of [`crate::decode`]: always writes the latest version,
//! with tags in one canonical order. Pattern notes are packed through the
//! same recent-shape and recent-pitch move-to-front lists the decoder
//! maintains, so `decode(encode(song))` reproduces the model exactly.

use crate::bits::{value_to_char, BitWriter};
use crate::decode::{
    INITIAL_LAST_PITCH, INITIAL_LAST_PITCH_NOISE, LATEST_VERSION, RECENT_PITCH_SEED,
    RECENT_PITCH_SEED_NOISE, RECENT_SHAPE_LIMIT,
};
use crate::song::{FilterSettings, Instrument, InstrumentKind, Song};
use crate::{effect, MAX_CHORD_SIZE, OPERATOR_COUNT};

/// Encode a song as a URL string at the latest version.
pub fn to_url(song: &Song) -> String {
    let mut url = String::new();
    let push_value = |url: &mut String, value: u32| url.push(value_to_char(value as u8));

    url.push(value_to_char(LATEST_VERSION as u8));

    url.push('n');
    push_value(&mut url, song.pitch_channel_count as u32);
    push_value(&mut url, song.noise_channel_count as u32);

    url.push('s');
    push_value(&mut url, song.scale as u32);
    url.push('k');
    push_value(&mut url, song.key as u32);

    url.push('l');
    push_value2(&mut url, song.loop_start as u32);
    url.push('e');
    push_value2(&mut url, song.loop_length as u32 - 1);

    url.push('t');
    push_value2(&mut url, song.tempo);

    url.push('a');
    push_value(&mut url, song.beats_per_bar as u32 - 1);
    url.push('g');
    push_value2(&mut url, song.bar_count as u32 - 1);
    url.push('j');
    push_value(&mut url, song.patterns_per_channel as u32 - 1);
    url.push('i');
    push_value(&mut url, song.instruments_per_channel as u32 - 1);
    url.push('r');
    push_value(&mut url, song.rhythm as u32);

    url.push('o');
    for channel in &song.channels {
        push_value(&mut url, channel.octave);
    }

    for channel_index in 0..song.channels.len() {
        let noise = song.channel_is_noise(channel_index);
        for instrument in &song.channels[channel_index].instruments {
            write_instrument(&mut url, instrument, noise);
        }
    }

    write_bars(&mut url, song);
    write_patterns(&mut url, song);

    url
}

fn push_value2(url: &mut String, value: u32) {
    url.push(value_to_char((value >> 6) as u8));
    url.push(value_to_char((value & 0x3f) as u8));
}

fn write_filter_points(url: &mut String, settings: &FilterSettings) {
    url.push(value_to_char(settings.points.len() as u8));
    for point in &settings.points {
        url.push(value_to_char(point.kind.to_index() as u8));
        url.push(value_to_char(point.freq as u8));
        url.push(value_to_char(point.gain as u8));
    }
}

fn write_bit_payload(url: &mut String, bits: &BitWriter) {
    let mut symbols = Vec::with_capacity(bits.len_base64());
    bits.encode(&mut symbols);
    for symbol in symbols {
        url.push(value_to_char(symbol));
    }
}

fn write_instrument(url: &mut String, instrument: &Instrument, noise: bool) {
    let push = |url: &mut String, value: u32| url.push(value_to_char(value as u8));

    url.push('T');
    push(url, instrument.kind.to_index());
    url.push('v');
    push(url, instrument.volume);
    url.push('u');
    push(url, instrument.preset & 0x3f);

    url.push('q');
    push(url, instrument.effects & effect::ALL);
    if instrument.effects & effect::DISTORTION != 0 {
        url.push('D');
        push(url, instrument.distortion);
    }
    if instrument.effects & effect::BITCRUSHER != 0 {
        url.push('R');
        push(url, instrument.bitcrusher_freq);
        push(url, instrument.bitcrusher_quantization);
    }
    if instrument.effects & effect::FILTER != 0 {
        url.push('G');
        write_filter_points(url, &instrument.distortion_filter);
    }
    if instrument.effects & effect::PANNING != 0 {
        url.push('L');
        push(url, instrument.pan);
    }
    if instrument.effects & effect::REVERB != 0 {
        url.push('m');
        push(url, instrument.reverb);
    }

    url.push('f');
    push(url, instrument.filter_envelope as u32);
    write_filter_points(url, &instrument.filter);

    url.push('d');
    push(url, instrument.transition as u32);
    url.push('C');
    push(url, instrument.chord as u32);
    url.push('c');
    push(url, instrument.vibrato as u32);

    match instrument.kind {
        InstrumentKind::Chip => {
            url.push('w');
            push(url, instrument.chip_wave as u32);
            url.push('h');
            push(url, instrument.unison as u32);
        }
        InstrumentKind::Harmonics => {
            url.push('H');
            let mut bits = BitWriter::new();
            for &value in &instrument.harmonics {
                bits.write(3, value);
            }
            write_bit_payload(url, &bits);
            url.push('h');
            push(url, instrument.unison as u32);
        }
        InstrumentKind::Noise => {
            debug_assert!(noise);
            url.push('w');
            push(url, instrument.noise_wave as u32);
        }
        InstrumentKind::Fm => {
            url.push('A');
            push(url, instrument.algorithm as u32);
            url.push('F');
            push(url, instrument.feedback_type as u32);
            url.push('B');
            push(url, instrument.feedback_amplitude);
            push(url, instrument.feedback_envelope as u32);
            url.push('Q');
            for operator in &instrument.operators {
                push(url, operator.frequency as u32);
            }
            url.push('P');
            for operator in &instrument.operators {
                push(url, operator.amplitude);
                push(url, operator.envelope as u32);
            }
        }
        InstrumentKind::Spectrum => {
            url.push('S');
            write_spectrum(url, &instrument.spectrum);
        }
        InstrumentKind::Drumset => {
            url.push('S');
            for &envelope in &instrument.drum_envelopes {
                push(url, envelope as u32);
            }
            for spectrum in &instrument.drum_spectra {
                write_spectrum(url, spectrum);
            }
        }
        InstrumentKind::Pwm => {
            url.push('W');
            push(url, instrument.pulse_width);
            push(url, instrument.pulse_envelope as u32);
        }
        InstrumentKind::Guitar => {
            url.push('U');
            push(url, instrument.sustain);
            url.push('W');
            push(url, instrument.pulse_width);
        }
    }
}

fn write_spectrum(url: &mut String, spectrum: &[u32]) {
    let mut bits = BitWriter::new();
    for &value in spectrum {
        bits.write(3, value);
    }
    write_bit_payload(url, &bits);
}

fn write_bars(url: &mut String, song: &Song) {
    let mut needed_bits = 0u32;
    while (1usize << needed_bits) < song.patterns_per_channel + 1 {
        needed_bits += 1;
    }
    let mut bits = BitWriter::new();
    for channel in &song.channels {
        for &reference in &channel.bars {
            // Stale references beyond the pattern count become silence.
            let reference =
                if reference as usize > song.patterns_per_channel { 0 } else { reference };
            bits.write(needed_bits, reference);
        }
    }
    url.push('b');
    write_bit_payload(url, &bits);
}

fn write_patterns(url: &mut String, song: &Song) {
    let mut needed_instrument_bits = 0u32;
    while (1usize << needed_instrument_bits) < song.instruments_per_channel {
        needed_instrument_bits += 1;
    }
    let parts_per_bar = song.parts_per_bar();
    let mut bits = BitWriter::new();

    for channel_index in 0..song.channels.len() {
        let noise = song.channel_is_noise(channel_index);
        let mut last_pitch = if noise { INITIAL_LAST_PITCH_NOISE } else { INITIAL_LAST_PITCH };
        let mut recent_pitches: Vec<u32> =
            if noise { RECENT_PITCH_SEED_NOISE.to_vec() } else { RECENT_PITCH_SEED.to_vec() };
        let mut recent_shapes: Vec<BitWriter> = Vec::new();

        for pattern in &song.channels[channel_index].patterns {
            bits.write(needed_instrument_bits, pattern.instrument as u32);
            if pattern.notes.is_empty() {
                bits.write(1, 0);
                continue;
            }
            bits.write(1, 1);

            let mut current_part = 0u32;
            for note in &pattern.notes {
                if note.start > current_part {
                    bits.write(2, 0b00);
                    bits.write_part_duration(note.start - current_part);
                }

                // The pitch-independent shape, packed separately so
                // repeated rhythms can be re-referenced.
                let mut shape = BitWriter::new();
                for _ in 1..note.pitches.len() {
                    shape.write(1, 1);
                }
                if note.pitches.len() < MAX_CHORD_SIZE {
                    shape.write(1, 0);
                }
                shape.write_pin_count(note.pins.len() as u32 - 1);
                shape.write(2, note.pins[0].expression);

                let base_pitch = note.pitches[0] as i32;
                let mut current_interval = 0i32;
                let mut shape_part = 0u32;
                let mut pitch_bends: Vec<u32> = Vec::new();
                for pin in &note.pins[1..] {
                    if pin.interval != current_interval {
                        shape.write(1, 1);
                        pitch_bends.push((base_pitch + pin.interval).max(0) as u32);
                        current_interval = pin.interval;
                    } else {
                        shape.write(1, 0);
                    }
                    shape.write_part_duration(pin.time - shape_part);
                    shape_part = pin.time;
                    shape.write(2, pin.expression);
                }

                if let Some(index) = recent_shapes.iter().position(|s| *s == shape) {
                    bits.write(2, 0b11);
                    bits.write_long_tail(0, 0, index as u32);
                    recent_shapes.remove(index);
                } else {
                    bits.write(2, 0b10);
                    bits.concat(&shape);
                }
                recent_shapes.insert(0, shape);
                recent_shapes.truncate(RECENT_SHAPE_LIMIT);

                for (index, &pitch) in
                    note.pitches.iter().chain(pitch_bends.iter()).enumerate()
                {
                    if let Some(recent_index) =
                        recent_pitches.iter().position(|&recent| recent == pitch)
                    {
                        bits.write(1, 1);
                        bits.write(3, recent_index as u32);
                        recent_pitches.remove(recent_index);
                    } else {
                        bits.write(1, 0);
                        bits.write_pitch_interval(count_pitch_interval(
                            last_pitch,
                            pitch,
                            &recent_pitches,
                        ));
                    }
                    recent_pitches.insert(0, pitch);
                    recent_pitches.truncate(8);
                    last_pitch =
                        if index == note.pitches.len() - 1 { note.pitches[0] } else { pitch };
                }

                current_part = note.end;
            }

            if current_part < parts_per_bar {
                bits.write(2, 0b00);
                bits.write_part_duration(parts_per_bar - current_part);
            }
        }
    }

    // Length-of-length prefix, then the bit stream.
    let mut payload = Vec::with_capacity(bits.len_base64());
    bits.encode(&mut payload);
    let mut digits: Vec<u8> = Vec::new();
    let mut remaining = payload.len();
    while remaining > 0 {
        digits.push((remaining & 0x3f) as u8);
        remaining >>= 6;
    }
    digits.reverse();

    url.push('p');
    url.push(value_to_char(digits.len() as u8));
    for digit in digits {
        url.push(value_to_char(digit));
    }
    for symbol in payload {
        url.push(value_to_char(symbol));
    }
}

/// Count the semitone steps from `from` to `to` that are not shadowed by
/// the recent-pitch list; the decoder walks the same count back.
fn count_pitch_interval(from: u32, to: u32, recent: &[u32]) -> i32 {
    let mut interval = 0i32;
    let mut pitch = from as i32;
    let target = to as i32;
    let step = if target > pitch { 1 } else { -1 };
    while pitch != target {
        pitch += step;
        if pitch < 0 || !recent.contains(&(pitch as u32)) {
            interval += step;
        }
    }
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::from_url;
    use crate::song::{Note, Pin};

    #[test]
    fn test_default_song_round_trips() {
        let song = Song::new();
        let url = to_url(&song);
        let decoded = from_url(&url).unwrap();
        assert_eq!(song, decoded);
    }

    #[test]
    fn test_url_starts_with_version() {
        let url = to_url(&Song::new());
        assert!(url.starts_with('9'));
    }

    #[test]
    fn test_notes_round_trip() {
        let mut song = Song::new();
        song.channels[0].bars[0] = 1;
        let pattern = &mut song.channels[0].patterns[0];
        pattern.notes.push(Note::new(0, 24, 48, 3));
        let mut bent = Note::new(24, 48, 52, 2);
        bent.pins = vec![
            Pin { time: 0, interval: 0, expression: 2 },
            Pin { time: 12, interval: 3, expression: 3 },
            Pin { time: 24, interval: 3, expression: 0 },
        ];
        pattern.notes.push(bent);
        let mut chord = Note::new(48, 96, 48, 3);
        chord.pitches = vec![48, 52, 55];
        pattern.notes.push(chord);

        let decoded = from_url(&to_url(&song)).unwrap();
        assert_eq!(song, decoded);
    }

    #[test]
    fn test_shape_reuse_round_trips() {
        let mut song = Song::new();
        song.channels[0].bars[0] = 1;
        let pattern = &mut song.channels[0].patterns[0];
        // Four identical rhythms at different pitches exercise the
        // recent-shape list.
        for index in 0..4u32 {
            pattern.notes.push(Note::new(index * 24, index * 24 + 12, 36 + index * 5, 3));
        }
        let decoded = from_url(&to_url(&song)).unwrap();
        assert_eq!(song, decoded);
    }

    #[test]
    fn test_count_pitch_interval_matches_walk() {
        let recent = vec![13, 14, 20];
        assert_eq!(count_pitch_interval(12, 16, &recent), 2);
        assert_eq!(count_pitch_interval(16, 12, &recent), -2);
        assert_eq!(count_pitch_interval(12, 12, &recent), 0);
    }
}
