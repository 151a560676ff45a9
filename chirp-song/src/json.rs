//! JSON import/export
//!
//! The JSON form is the human-readable alternate to the URL codec. Import
//! is deliberately loose: unknown fields are ignored, missing fields take
//! defaults, out-of-range values are clamped, and historical names (scales,
//! chords) are accepted through the alias tables in [`config`].

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config;
use crate::error::SongError;
use crate::song::{
    FilterControlPoint, FilterSettings, FilterType, Instrument, InstrumentKind, Note, Pattern,
    Pin, Song,
};
use crate::{
    effect, BITCRUSHER_FREQ_RANGE, BITCRUSHER_QUANTIZATION_RANGE, DISTORTION_MAX,
    EXPRESSION_MAX, FILTER_FREQ_RANGE, FILTER_GAIN_RANGE, HARMONICS_CONTROL_POINTS,
    OPERATOR_AMPLITUDE_MAX, OPERATOR_COUNT, PAN_MAX, PULSE_WIDTH_RANGE, REVERB_RANGE,
    SPECTRUM_CONTROL_POINTS, SUSTAIN_MAX, VOLUME_RANGE,
};

/// The `format` marker written into exported JSON, kept for interchange
/// with the original family of editors.
const FORMAT_NAME: &str = "BeepBox";

/// Volume percentages for each instrument volume setting.
const VOLUME_PERCENTAGES: [u32; VOLUME_RANGE as usize] = [100, 71, 50, 35, 25, 0];

// =============================================================================
// Export
// =============================================================================

/// Serialize a song as a JSON document.
pub fn to_json(song: &Song) -> Value {
    let channels: Vec<Value> = (0..song.channels.len())
        .map(|index| channel_to_json(song, index))
        .collect();

    json!({
        "format": FORMAT_NAME,
        "version": crate::decode::LATEST_VERSION,
        "scale": config::SCALES[song.scale].name,
        "key": config::KEYS[song.key].name,
        "introBars": song.loop_start,
        "loopBars": song.loop_length,
        "beatsPerBar": song.beats_per_bar,
        "ticksPerBeat": config::RHYTHMS[song.rhythm].steps_per_beat,
        "beatsPerMinute": song.tempo,
        "channels": channels,
    })
}

fn channel_to_json(song: &Song, index: usize) -> Value {
    let channel = &song.channels[index];
    let noise = song.channel_is_noise(index);
    let instruments: Vec<Value> =
        channel.instruments.iter().map(|i| instrument_to_json(i, noise)).collect();
    let patterns: Vec<Value> = channel.patterns.iter().map(pattern_to_json).collect();
    json!({
        "type": if noise { "drum" } else { "pitch" },
        "octaveScrollBar": channel.octave,
        "instruments": instruments,
        "patterns": patterns,
        "sequence": channel.bars,
    })
}

fn pattern_to_json(pattern: &Pattern) -> Value {
    let notes: Vec<Value> = pattern
        .notes
        .iter()
        .map(|note| {
            let points: Vec<Value> = note
                .pins
                .iter()
                .map(|pin| {
                    json!({
                        "tick": note.start + pin.time,
                        "pitchBend": pin.interval,
                        "volume": (pin.expression * 100).div_ceil(EXPRESSION_MAX),
                    })
                })
                .collect();
            json!({ "pitches": note.pitches, "points": points })
        })
        .collect();
    json!({ "instrument": pattern.instrument + 1, "notes": notes })
}

fn filter_to_json(settings: &FilterSettings) -> Vec<Value> {
    settings
        .points
        .iter()
        .map(|point| {
            let kind = match point.kind {
                FilterType::LowPass => "low-pass",
                FilterType::HighPass => "high-pass",
                FilterType::Peak => "peak",
            };
            json!({ "type": kind, "freq": point.freq, "gain": point.gain })
        })
        .collect()
}

fn instrument_to_json(instrument: &Instrument, noise: bool) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), json!(instrument.kind.name()));
    map.insert(
        "volume".into(),
        json!(VOLUME_PERCENTAGES[instrument.volume.min(VOLUME_RANGE - 1) as usize]),
    );
    map.insert("preset".into(), json!(instrument.preset));
    map.insert("transition".into(), json!(config::TRANSITIONS[instrument.transition].name));
    map.insert("chord".into(), json!(config::CHORDS[instrument.chord].name));
    map.insert("vibrato".into(), json!(config::VIBRATOS[instrument.vibrato].name));
    map.insert("filter".into(), json!(filter_to_json(&instrument.filter)));
    map.insert(
        "filterEnvelope".into(),
        json!(config::ENVELOPES[instrument.filter_envelope].name),
    );

    let mut effects = Vec::new();
    for (bit, name) in effect_names() {
        if instrument.effects & bit != 0 {
            effects.push(json!(name));
        }
    }
    map.insert("effects".into(), json!(effects));
    if instrument.effects & effect::DISTORTION != 0 {
        map.insert("distortion".into(), json!(instrument.distortion));
    }
    if instrument.effects & effect::BITCRUSHER != 0 {
        map.insert("bitcrusherFreq".into(), json!(instrument.bitcrusher_freq));
        map.insert(
            "bitcrusherQuantization".into(),
            json!(instrument.bitcrusher_quantization),
        );
    }
    if instrument.effects & effect::FILTER != 0 {
        map.insert("effectFilter".into(), json!(filter_to_json(&instrument.distortion_filter)));
    }
    if instrument.effects & effect::PANNING != 0 {
        map.insert("pan".into(), json!(instrument.pan));
    }
    if instrument.effects & effect::REVERB != 0 {
        map.insert("reverb".into(), json!(instrument.reverb));
    }

    match instrument.kind {
        InstrumentKind::Chip => {
            map.insert("wave".into(), json!(config::CHIP_WAVES[instrument.chip_wave].name));
            map.insert("interval".into(), json!(config::UNISONS[instrument.unison].name));
        }
        InstrumentKind::Harmonics => {
            map.insert("harmonics".into(), json!(instrument.harmonics.to_vec()));
            map.insert("interval".into(), json!(config::UNISONS[instrument.unison].name));
        }
        InstrumentKind::Noise => {
            debug_assert!(noise);
            map.insert("wave".into(), json!(config::NOISE_WAVES[instrument.noise_wave].name));
        }
        InstrumentKind::Fm => {
            map.insert("algorithm".into(), json!(config::ALGORITHMS[instrument.algorithm].name));
            map.insert(
                "feedbackType".into(),
                json!(config::FEEDBACKS[instrument.feedback_type].name),
            );
            map.insert("feedbackAmplitude".into(), json!(instrument.feedback_amplitude));
            map.insert(
                "feedbackEnvelope".into(),
                json!(config::ENVELOPES[instrument.feedback_envelope].name),
            );
            let operators: Vec<Value> = instrument
                .operators
                .iter()
                .map(|operator| {
                    json!({
                        "frequency": config::OPERATOR_FREQUENCIES[operator.frequency].name,
                        "amplitude": operator.amplitude,
                        "envelope": config::ENVELOPES[operator.envelope].name,
                    })
                })
                .collect();
            map.insert("operators".into(), json!(operators));
        }
        InstrumentKind::Spectrum => {
            map.insert("spectrum".into(), json!(instrument.spectrum.to_vec()));
        }
        InstrumentKind::Drumset => {
            let drums: Vec<Value> = (0..crate::DRUM_COUNT)
                .map(|drum| {
                    json!({
                        "filterEnvelope":
                            config::ENVELOPES[instrument.drum_envelopes[drum]].name,
                        "spectrum": instrument.drum_spectra[drum].to_vec(),
                    })
                })
                .collect();
            map.insert("drums".into(), json!(drums));
        }
        InstrumentKind::Pwm => {
            map.insert("pulseWidth".into(), json!(instrument.pulse_width));
            map.insert(
                "pulseEnvelope".into(),
                json!(config::ENVELOPES[instrument.pulse_envelope].name),
            );
        }
        InstrumentKind::Guitar => {
            map.insert("sustain".into(), json!(instrument.sustain));
            map.insert("pulseWidth".into(), json!(instrument.pulse_width));
        }
    }

    Value::Object(map)
}

fn effect_names() -> [(u32, &'static str); 6] {
    [
        (effect::DISTORTION, "distortion"),
        (effect::BITCRUSHER, "bitcrusher"),
        (effect::FILTER, "filter"),
        (effect::PANNING, "panning"),
        (effect::CHORUS, "chorus"),
        (effect::REVERB, "reverb"),
    ]
}

// =============================================================================
// Import
// =============================================================================

/// Parse a song from a JSON document string.
pub fn from_json(text: &str) -> Result<Song, SongError> {
    let root: Value =
        serde_json::from_str(text).map_err(|error| SongError::InvalidJson(error.to_string()))?;
    let mut song = Song::new();

    song.scale = as_str(&root, "scale")
        .map(config::scale_index_from_name)
        .unwrap_or(song.scale);
    song.key = as_str(&root, "key").map(config::key_index_from_name).unwrap_or(song.key);
    if let Some(tempo) = as_u32(&root, "beatsPerMinute") {
        song.set_tempo(tempo);
    }
    if let Some(beats) = as_u32(&root, "beatsPerBar") {
        song.set_beats_per_bar(beats as usize);
    }
    if let Some(steps) = as_u32(&root, "ticksPerBeat") {
        song.rhythm = config::RHYTHMS
            .iter()
            .position(|rhythm| rhythm.steps_per_beat == steps as usize)
            .unwrap_or(config::RHYTHM_DEFAULT);
    }

    let channels = root.get("channels").and_then(Value::as_array).cloned().unwrap_or_default();
    if !channels.is_empty() {
        ingest_channels(&mut song, &channels);
    }

    song.loop_start = as_u32(&root, "introBars").unwrap_or(0) as usize;
    song.loop_length = as_u32(&root, "loopBars").unwrap_or(song.bar_count as u32) as usize;
    if song.loop_start >= song.bar_count {
        song.loop_start = 0;
    }
    song.loop_length = song.loop_length.clamp(1, song.bar_count - song.loop_start);

    // Historical song-global reverb; identical to the legacy URL transfer.
    if let Some(reverb) = as_u32(&root, "reverb") {
        let amount = reverb.min(4);
        if amount > 0 {
            for channel_index in 0..song.pitch_channel_count {
                for instrument in &mut song.channels[channel_index].instruments {
                    instrument.reverb = amount;
                    instrument.effects |= effect::REVERB;
                }
            }
        }
    }

    song.validate();
    Ok(song)
}

fn ingest_channels(song: &mut Song, channels: &[Value]) {
    let pitch_count = channels
        .iter()
        .filter(|channel| as_str(channel, "type") != Some("drum"))
        .count();
    let noise_count = channels.len() - pitch_count;
    song.set_channel_counts(pitch_count.max(1), noise_count);

    let mut max_instruments = 1;
    let mut max_patterns = 1;
    let mut max_bars = 1;
    for channel in channels {
        if let Some(list) = channel.get("instruments").and_then(Value::as_array) {
            max_instruments = max_instruments.max(list.len());
        }
        if let Some(list) = channel.get("patterns").and_then(Value::as_array) {
            max_patterns = max_patterns.max(list.len());
        }
        if let Some(list) = channel.get("sequence").and_then(Value::as_array) {
            max_bars = max_bars.max(list.len());
        }
    }
    song.set_instruments_per_channel(max_instruments);
    song.set_patterns_per_channel(max_patterns);
    song.set_bar_count(max_bars);

    // Pitch channels first, then drums, regardless of their JSON order.
    // When the document has no pitch channels a default one occupies
    // index 0, so drum ingestion starts at the song's noise offset.
    let noise_offset = song.pitch_channel_count;
    let pitch = channels.iter().filter(|channel| as_str(channel, "type") != Some("drum"));
    let drums = channels.iter().filter(|channel| as_str(channel, "type") == Some("drum"));
    let ordered =
        pitch.enumerate().chain(drums.enumerate().map(|(i, value)| (noise_offset + i, value)));

    for (channel_index, value) in ordered {
        if channel_index >= song.channels.len() {
            debug!("ignoring extra channels beyond the supported count");
            continue;
        }
        let noise = song.channel_is_noise(channel_index);
        let parts_per_bar = song.parts_per_bar();
        let max_pitch = song.max_pitch_for_channel(channel_index);
        let instrument_count = song.instruments_per_channel;
        let channel = &mut song.channels[channel_index];

        channel.octave =
            if noise { 0 } else { as_u32(value, "octaveScrollBar").unwrap_or(0).min(crate::OCTAVE_MAX) };

        if let Some(list) = value.get("instruments").and_then(Value::as_array) {
            for (index, entry) in list.iter().enumerate().take(channel.instruments.len()) {
                channel.instruments[index] = instrument_from_json(entry, noise);
            }
        }
        if let Some(list) = value.get("patterns").and_then(Value::as_array) {
            for (index, entry) in list.iter().enumerate().take(channel.patterns.len()) {
                channel.patterns[index] =
                    pattern_from_json(entry, instrument_count, parts_per_bar, max_pitch);
            }
        }
        if let Some(list) = value.get("sequence").and_then(Value::as_array) {
            for (index, entry) in list.iter().enumerate().take(channel.bars.len()) {
                channel.bars[index] = entry.as_u64().unwrap_or(0) as u32;
            }
        }
    }
}

fn pattern_from_json(
    value: &Value,
    instrument_count: usize,
    parts_per_bar: u32,
    max_pitch: u32,
) -> Pattern {
    let mut pattern = Pattern {
        // JSON instrument references are 1-based.
        instrument: (as_u32(value, "instrument").unwrap_or(1).max(1) as usize - 1)
            .min(instrument_count - 1),
        notes: Vec::new(),
    };
    let Some(notes) = value.get("notes").and_then(Value::as_array) else {
        return pattern;
    };
    let mut previous_end = 0u32;
    for entry in notes {
        let Some(points) = entry.get("points").and_then(Value::as_array) else { continue };
        if points.len() < 2 {
            continue;
        }
        let ticks: Vec<u32> =
            points.iter().map(|point| as_u32(point, "tick").unwrap_or(0)).collect();
        let start = *ticks.first().unwrap();
        let end = *ticks.last().unwrap();
        if end <= start || start < previous_end || start >= parts_per_bar {
            debug!("skipping out-of-order note in JSON pattern");
            continue;
        }
        let pitches: Vec<u32> = entry
            .get("pitches")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_u64)
                    .map(|pitch| (pitch as u32).min(max_pitch))
                    .take(crate::MAX_CHORD_SIZE)
                    .collect()
            })
            .unwrap_or_default();
        if pitches.is_empty() {
            continue;
        }
        let pins: Vec<Pin> = points
            .iter()
            .zip(&ticks)
            .map(|(point, &tick)| Pin {
                time: tick.saturating_sub(start),
                interval: point.get("pitchBend").and_then(Value::as_i64).unwrap_or(0) as i32,
                expression: expression_from_volume(as_u32(point, "volume").unwrap_or(100)),
            })
            .collect();
        let mut note = Note { start, end: end.min(parts_per_bar), pitches, pins };
        note.pins[0].interval = 0;
        previous_end = note.end;
        pattern.notes.push(note);
    }
    pattern
}

/// JSON volumes are percentages; internal expression is 0..=3.
fn expression_from_volume(volume: u32) -> u32 {
    ((volume.min(100) * EXPRESSION_MAX + 50) / 100).min(EXPRESSION_MAX)
}

fn instrument_from_json(value: &Value, noise: bool) -> Instrument {
    let kind = as_str(value, "type")
        .and_then(InstrumentKind::from_name)
        .filter(|kind| kind.allowed_in(noise))
        .unwrap_or(if noise { InstrumentKind::Noise } else { InstrumentKind::Chip });
    let mut instrument = Instrument::new(kind);

    if let Some(volume) = as_u32(value, "volume") {
        instrument.volume = VOLUME_PERCENTAGES
            .iter()
            .position(|&percent| volume >= percent)
            .unwrap_or(VOLUME_PERCENTAGES.len() - 1) as u32;
    }
    instrument.preset = as_u32(value, "preset").unwrap_or(0);
    if let Some(name) = as_str(value, "transition") {
        instrument.transition = config::transition_index_from_name(name);
    }
    if let Some(name) = as_str(value, "chord") {
        instrument.chord = config::chord_index_from_name(name);
    }
    if let Some(name) = as_str(value, "vibrato").or(as_str(value, "effect")) {
        instrument.vibrato = config::vibrato_index_from_name(name);
    }
    if let Some(name) = as_str(value, "interval") {
        instrument.unison = config::unison_index_from_name(name);
    }
    if let Some(points) = value.get("filter").and_then(Value::as_array) {
        instrument.filter = filter_from_json(points);
    }
    if let Some(name) = as_str(value, "filterEnvelope") {
        instrument.filter_envelope = config::envelope_index_from_name(name);
    }

    if let Some(effects) = value.get("effects").and_then(Value::as_array) {
        instrument.effects = 0;
        for entry in effects.iter().filter_map(Value::as_str) {
            if let Some((bit, _)) = effect_names().iter().find(|(_, name)| *name == entry) {
                instrument.effects |= bit;
            }
        }
    }
    if let Some(amount) = as_u32(value, "distortion") {
        instrument.distortion = amount.min(DISTORTION_MAX);
    }
    if let Some(freq) = as_u32(value, "bitcrusherFreq") {
        instrument.bitcrusher_freq = freq.min(BITCRUSHER_FREQ_RANGE - 1);
    }
    if let Some(quantization) = as_u32(value, "bitcrusherQuantization") {
        instrument.bitcrusher_quantization = quantization.min(BITCRUSHER_QUANTIZATION_RANGE - 1);
    }
    if let Some(points) = value.get("effectFilter").and_then(Value::as_array) {
        instrument.distortion_filter = filter_from_json(points);
    }
    if let Some(pan) = as_u32(value, "pan") {
        instrument.pan = pan.min(PAN_MAX);
    }
    if let Some(reverb) = as_u32(value, "reverb") {
        instrument.reverb = reverb.min(REVERB_RANGE - 1);
    }

    match kind {
        InstrumentKind::Chip => {
            if let Some(name) = as_str(value, "wave") {
                instrument.chip_wave = config::chip_wave_index_from_name(name);
            }
        }
        InstrumentKind::Noise => {
            if let Some(name) = as_str(value, "wave") {
                instrument.noise_wave = config::noise_wave_index_from_name(name);
            }
        }
        InstrumentKind::Harmonics => {
            if let Some(values) = value.get("harmonics").and_then(Value::as_array) {
                for (index, entry) in
                    values.iter().enumerate().take(HARMONICS_CONTROL_POINTS)
                {
                    instrument.harmonics[index] =
                        (entry.as_u64().unwrap_or(0) as u32).min(crate::HARMONICS_MAX);
                }
            }
        }
        InstrumentKind::Fm => {
            if let Some(name) = as_str(value, "algorithm") {
                instrument.algorithm = config::ALGORITHMS
                    .iter()
                    .position(|algorithm| algorithm.name == name)
                    .unwrap_or(0);
            }
            if let Some(name) = as_str(value, "feedbackType") {
                instrument.feedback_type = config::FEEDBACKS
                    .iter()
                    .position(|feedback| feedback.name == name)
                    .unwrap_or(0);
            }
            if let Some(amplitude) = as_u32(value, "feedbackAmplitude") {
                instrument.feedback_amplitude = amplitude.min(OPERATOR_AMPLITUDE_MAX);
            }
            if let Some(name) = as_str(value, "feedbackEnvelope") {
                instrument.feedback_envelope = config::envelope_index_from_name(name);
            }
            if let Some(operators) = value.get("operators").and_then(Value::as_array) {
                for (index, entry) in operators.iter().enumerate().take(OPERATOR_COUNT) {
                    if let Some(name) = as_str(entry, "frequency") {
                        instrument.operators[index].frequency = config::OPERATOR_FREQUENCIES
                            .iter()
                            .position(|frequency| frequency.name == name)
                            .unwrap_or(0);
                    }
                    if let Some(amplitude) = as_u32(entry, "amplitude") {
                        instrument.operators[index].amplitude =
                            amplitude.min(OPERATOR_AMPLITUDE_MAX);
                    }
                    if let Some(name) = as_str(entry, "envelope") {
                        instrument.operators[index].envelope =
                            config::envelope_index_from_name(name);
                    }
                }
            }
        }
        InstrumentKind::Spectrum => {
            if let Some(values) = value.get("spectrum").and_then(Value::as_array) {
                ingest_spectrum(&mut instrument.spectrum, values);
            }
        }
        InstrumentKind::Drumset => {
            if let Some(drums) = value.get("drums").and_then(Value::as_array) {
                for (drum, entry) in drums.iter().enumerate().take(crate::DRUM_COUNT) {
                    if let Some(name) = as_str(entry, "filterEnvelope") {
                        instrument.drum_envelopes[drum] = config::envelope_index_from_name(name);
                    }
                    if let Some(values) = entry.get("spectrum").and_then(Value::as_array) {
                        ingest_spectrum(&mut instrument.drum_spectra[drum], values);
                    }
                }
            }
        }
        InstrumentKind::Pwm => {
            if let Some(width) = as_u32(value, "pulseWidth") {
                instrument.pulse_width = width.clamp(1, PULSE_WIDTH_RANGE);
            }
            if let Some(name) = as_str(value, "pulseEnvelope") {
                instrument.pulse_envelope = config::envelope_index_from_name(name);
            }
        }
        InstrumentKind::Guitar => {
            if let Some(sustain) = as_u32(value, "sustain") {
                instrument.sustain = sustain.min(SUSTAIN_MAX);
            }
            if let Some(width) = as_u32(value, "pulseWidth") {
                instrument.pulse_width = width.clamp(1, PULSE_WIDTH_RANGE);
            }
        }
    }

    instrument
}

fn ingest_spectrum(target: &mut [u32; SPECTRUM_CONTROL_POINTS], values: &[Value]) {
    for (index, entry) in values.iter().enumerate().take(SPECTRUM_CONTROL_POINTS) {
        target[index] = (entry.as_u64().unwrap_or(0) as u32).min(crate::SPECTRUM_MAX);
    }
}

fn filter_from_json(points: &[Value]) -> FilterSettings {
    let mut settings = FilterSettings::default();
    for point in points.iter().take(crate::FILTER_MAX_POINTS) {
        let kind = match as_str(point, "type") {
            Some("high-pass") => FilterType::HighPass,
            Some("peak") => FilterType::Peak,
            _ => FilterType::LowPass,
        };
        settings.points.push(FilterControlPoint {
            kind,
            freq: as_u32(point, "freq").unwrap_or(0).min(FILTER_FREQ_RANGE - 1),
            gain: as_u32(point, "gain")
                .unwrap_or(crate::FILTER_GAIN_CENTER)
                .min(FILTER_GAIN_RANGE - 1),
        });
    }
    settings
}

fn as_str<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

fn as_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v.min(u32::MAX as u64) as u32)
}
