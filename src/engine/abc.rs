//! Built-in ABC notation engine.
//!
//! Parses the subset of ABC used in practice (header fields, notes with
//! accidentals/octave marks/lengths, rests, chords, bars, annotations,
//! decorations) and draws one treble staff per body line as plain SVG.
//! Unsupported-but-valid constructs (slurs, ties, tuplets, grace notes,
//! broken rhythm) are accepted and skipped.

use std::sync::LazyLock;
use std::time::Instant;

use log::debug;
use regex::Regex;

use super::{EngineError, NotationEngine};
use crate::tree::escape_html;

/// Default staff width in SVG units.
pub const DEFAULT_STAFF_WIDTH: f64 = 600.0;

const MARGIN: f64 = 20.0;
const LINE_GAP: f64 = 10.0;
const STEP_GAP: f64 = LINE_GAP / 2.0;
const SYSTEM_HEIGHT: f64 = 110.0;
const CLEF_SPACE: f64 = 40.0;
const NOTE_ADVANCE: f64 = 26.0;
const BAR_ADVANCE: f64 = 14.0;
const STEM_LENGTH: f64 = 30.0;

/// Diatonic step of the staff's bottom line (E4), counting C4 as 0.
const BOTTOM_LINE_STEP: i32 = 2;
/// Middle line (B4): stems flip direction here.
const MIDDLE_LINE_STEP: i32 = 6;
/// First ledger line above the staff (A5).
const UPPER_LEDGER_STEP: i32 = 12;

static FIELD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]):\s*(.*?)\s*$").unwrap());
static METER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(C\|?|none|[1-9]\d*/[1-9]\d*)$").unwrap());
static UNIT_LENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9]\d*)/([1-9]\d*)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accidental {
    Sharp,
    DoubleSharp,
    Flat,
    DoubleFlat,
    Natural,
}

impl Accidental {
    fn glyph(self) -> &'static str {
        match self {
            Accidental::Sharp => "\u{266F}",
            Accidental::DoubleSharp => "\u{1D12A}",
            Accidental::Flat => "\u{266D}",
            Accidental::DoubleFlat => "\u{1D12B}",
            Accidental::Natural => "\u{266E}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pitch {
    step: i32,
    accidental: Option<Accidental>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarStyle {
    Single,
    Double,
    Final,
    RepeatStart,
    RepeatEnd,
}

/// Lengths are fractions of a whole note.
#[derive(Debug, Clone, PartialEq)]
enum Symbol {
    Note { pitch: Pitch, length: f64 },
    Chord { pitches: Vec<Pitch>, length: f64 },
    Rest { length: f64, visible: bool },
    Bar(BarStyle),
    Annotation(String),
}

impl Symbol {
    fn is_musical(&self) -> bool {
        !matches!(self, Symbol::Annotation(_))
    }
}

#[derive(Debug, Default)]
struct Tune {
    title: Option<String>,
    composer: Option<String>,
    meter: Option<String>,
    key: Option<String>,
    unit: f64,
    lines: Vec<Vec<Symbol>>,
}

fn parse_error(line: usize, column: usize, msg: &str) -> EngineError {
    EngineError::Parse(format!("line {line}, column {column}: {msg}"))
}

fn apply_field(
    tune: &mut Tune,
    field: &str,
    value: &str,
    line: usize,
    column: usize,
) -> Result<(), EngineError> {
    match field {
        "X" => {
            value
                .parse::<u32>()
                .map_err(|_| parse_error(line, column, "X: must be a reference number"))?;
        }
        "T" => {
            if tune.title.is_none() {
                tune.title = Some(value.to_string());
            }
        }
        "C" => tune.composer = Some(value.to_string()),
        "M" => {
            if !METER.is_match(value) {
                return Err(parse_error(
                    line,
                    column,
                    &format!("invalid meter {value:?}"),
                ));
            }
            tune.meter = Some(value.to_string());
        }
        "L" => {
            let caps = UNIT_LENGTH.captures(value).ok_or_else(|| {
                parse_error(line, column, &format!("invalid unit length {value:?}"))
            })?;
            let num: f64 = caps[1].parse().unwrap_or(1.0);
            let den: f64 = caps[2].parse().unwrap_or(8.0);
            tune.unit = num / den;
        }
        "K" => tune.key = Some(value.to_string()),
        _ => {}
    }
    Ok(())
}

fn parse_tune(source: &str) -> Result<Tune, EngineError> {
    let has_key = source
        .lines()
        .any(|l| l.trim_start().starts_with("K:"));
    let mut tune = Tune {
        unit: 1.0 / 8.0,
        ..Tune::default()
    };
    // Without a K: field the whole text is read as music.
    let mut in_header = has_key;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();
        if let Some(caps) = FIELD_LINE.captures(trimmed) {
            let field = &caps[1];
            apply_field(&mut tune, field, &caps[2], line_no, indent + 1)?;
            if field == "K" {
                in_header = false;
            }
            continue;
        }
        if in_header {
            return Err(parse_error(line_no, indent + 1, "music before the K: field"));
        }
        let symbols = BodyParser::new(trimmed, line_no, indent).parse(&mut tune)?;
        if symbols.iter().any(Symbol::is_musical) {
            tune.lines.push(symbols);
        }
    }
    Ok(tune)
}

struct BodyParser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indent: usize,
}

fn is_note_letter(c: char) -> bool {
    matches!(c, 'A'..='G' | 'a'..='g')
}

fn is_note_start(c: char) -> bool {
    is_note_letter(c) || matches!(c, '^' | '_' | '=')
}

impl BodyParser {
    fn new(line_text: &str, line: usize, indent: usize) -> Self {
        Self {
            chars: line_text.chars().collect(),
            pos: 0,
            line,
            indent,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, msg: &str) -> EngineError {
        parse_error(self.line, self.indent + self.pos + 1, msg)
    }

    /// Consume through `close`, returning the enclosed text.
    fn delimited(&mut self, close: char, what: &str) -> Result<String, EngineError> {
        let start = self.pos;
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == close => return Ok(text),
                Some(c) => text.push(c),
                None => {
                    self.pos = start;
                    return Err(self.error(&format!("unterminated {what}")));
                }
            }
        }
    }

    fn digits(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .ok()
    }

    /// Length multiplier: `2`, `/`, `/4`, `3/2`, `//`.
    fn length(&mut self) -> Result<f64, EngineError> {
        let mut value = match self.digits() {
            Some(0) => return Err(self.error("zero-length note")),
            Some(n) => n as f64,
            None => 1.0,
        };
        while self.peek() == Some('/') {
            self.bump();
            match self.digits() {
                Some(0) => return Err(self.error("zero length denominator")),
                Some(d) => value /= d as f64,
                None => value /= 2.0,
            }
        }
        Ok(value)
    }

    fn pitch(&mut self) -> Result<Pitch, EngineError> {
        let accidental = match (self.peek(), self.peek_at(1)) {
            (Some('^'), Some('^')) => Some(Accidental::DoubleSharp),
            (Some('^'), _) => Some(Accidental::Sharp),
            (Some('_'), Some('_')) => Some(Accidental::DoubleFlat),
            (Some('_'), _) => Some(Accidental::Flat),
            (Some('='), _) => Some(Accidental::Natural),
            _ => None,
        };
        match accidental {
            Some(Accidental::DoubleSharp | Accidental::DoubleFlat) => self.pos += 2,
            Some(_) => self.pos += 1,
            None => {}
        }
        let letter = match self.peek() {
            Some(c) if is_note_letter(c) => c,
            _ => return Err(self.error("accidental without a note")),
        };
        self.bump();
        let mut step = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 1,
            'E' => 2,
            'F' => 3,
            'G' => 4,
            'A' => 5,
            _ => 6,
        };
        if letter.is_ascii_lowercase() {
            step += 7;
        }
        loop {
            match self.peek() {
                Some('\'') => step += 7,
                Some(',') => step -= 7,
                _ => break,
            }
            self.bump();
        }
        Ok(Pitch { step, accidental })
    }

    fn chord(&mut self, unit: f64) -> Result<Symbol, EngineError> {
        let start = self.pos;
        self.bump();
        let mut pitches = Vec::new();
        loop {
            match self.peek() {
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(c) if is_note_start(c) => {
                    pitches.push(self.pitch()?);
                    // Per-note lengths inside a chord are not drawn.
                    self.length()?;
                }
                Some(' ') => {
                    self.bump();
                }
                Some(_) => return Err(self.error("unexpected character in chord")),
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated chord"));
                }
            }
        }
        if pitches.is_empty() {
            self.pos = start;
            return Err(self.error("empty chord"));
        }
        let length = self.length()? * unit;
        Ok(Symbol::Chord { pitches, length })
    }

    fn bar(&mut self) -> Result<Symbol, EngineError> {
        let start = self.pos;
        let mut text = String::new();
        if self.peek() == Some('[') {
            text.push('[');
            self.bump();
        }
        while let Some(c) = self.peek().filter(|&c| matches!(c, '|' | ':' | ']')) {
            text.push(c);
            self.bump();
        }
        // Ending numbers: `|1`, `:|2`.
        self.digits();
        if !text.contains('|') && text != "::" {
            self.pos = start;
            return Err(self.error(&format!("unexpected {text:?}")));
        }
        let style = if text == "::" || (text.contains(":|") && text.contains("|:")) {
            BarStyle::RepeatEnd
        } else if text.starts_with("|:") || text.starts_with("[|:") {
            BarStyle::RepeatStart
        } else if text.ends_with(":|") || text.ends_with(":|]") {
            BarStyle::RepeatEnd
        } else if text.ends_with("|]") || text.starts_with("[|") {
            BarStyle::Final
        } else if text.contains("||") {
            BarStyle::Double
        } else {
            BarStyle::Single
        };
        Ok(Symbol::Bar(style))
    }

    fn parse(mut self, tune: &mut Tune) -> Result<Vec<Symbol>, EngineError> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '`' | 'y' | ')' | '-' | '>' | '<' | '\\' => {
                    self.bump();
                }
                '%' => break,
                '(' => {
                    self.bump();
                    while self.peek().is_some_and(|c| c.is_ascii_digit() || c == ':') {
                        self.bump();
                    }
                }
                '{' => {
                    self.delimited('}', "grace notes")?;
                }
                '"' => {
                    let text = self.delimited('"', "annotation")?;
                    let text = text.trim_start_matches(['^', '_', '<', '>', '@']);
                    out.push(Symbol::Annotation(text.to_string()));
                }
                '!' | '+' => {
                    self.delimited(c, "decoration")?;
                }
                '~' | '.' | 'H' | 'L' | 'M' | 'O' | 'P' | 'S' | 'T' | 'u' | 'v' => {
                    self.bump();
                }
                '|' | ':' => out.push(self.bar()?),
                '[' => match (self.peek_at(1), self.peek_at(2)) {
                    (Some('|'), _) => out.push(self.bar()?),
                    (Some(f), Some(':')) if f.is_ascii_alphabetic() => {
                        let column = self.indent + self.pos + 1;
                        let field = self.delimited(']', "inline field")?;
                        if let Some((name, value)) = field.split_once(':') {
                            apply_field(tune, name, value.trim(), self.line, column)?;
                        }
                    }
                    _ => out.push(self.chord(tune.unit)?),
                },
                'z' | 'x' => {
                    self.bump();
                    let length = self.length()? * tune.unit;
                    out.push(Symbol::Rest {
                        length,
                        visible: c == 'z',
                    });
                }
                'Z' => {
                    self.bump();
                    self.digits();
                    out.push(Symbol::Rest {
                        length: 1.0,
                        visible: true,
                    });
                }
                c if is_note_start(c) => {
                    let pitch = self.pitch()?;
                    let length = self.length()? * tune.unit;
                    out.push(Symbol::Note { pitch, length });
                }
                other => return Err(self.error(&format!("unexpected character '{other}'"))),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// SVG drawing
// ---------------------------------------------------------------------------

fn step_y(step: i32, staff_top: f64) -> f64 {
    staff_top + 4.0 * LINE_GAP - f64::from(step - BOTTOM_LINE_STEP) * STEP_GAP
}

fn line(out: &mut String, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
    out.push_str(&format!(
        "<line x1=\"{x1:.1}\" y1=\"{y1:.1}\" x2=\"{x2:.1}\" y2=\"{y2:.1}\" stroke=\"currentColor\" stroke-width=\"{width:.1}\"/>"
    ));
}

fn text(out: &mut String, class: &str, x: f64, y: f64, size: f64, anchor: &str, content: &str) {
    out.push_str(&format!(
        "<text class=\"{class}\" x=\"{x:.1}\" y=\"{y:.1}\" font-size=\"{size:.0}\" text-anchor=\"{anchor}\" fill=\"currentColor\">{}</text>",
        escape_html(content)
    ));
}

fn ledger_lines(out: &mut String, x: f64, step: i32, staff_top: f64) {
    let mut s = 0;
    while s >= step {
        let y = step_y(s, staff_top);
        line(out, x - 9.0, y, x + 9.0, y, 1.0);
        s -= 2;
    }
    let mut s = UPPER_LEDGER_STEP;
    while s <= step {
        let y = step_y(s, staff_top);
        line(out, x - 9.0, y, x + 9.0, y, 1.0);
        s += 2;
    }
}

fn note_head(out: &mut String, x: f64, y: f64, filled: bool) {
    let fill = if filled { "currentColor" } else { "none" };
    out.push_str(&format!(
        "<ellipse class=\"abc-note\" cx=\"{x:.1}\" cy=\"{y:.1}\" rx=\"5.5\" ry=\"4.0\" fill=\"{fill}\" stroke=\"currentColor\" stroke-width=\"1.5\"/>"
    ));
}

fn draw_notes(out: &mut String, x: f64, pitches: &[Pitch], length: f64, staff_top: f64) {
    let filled = length < 0.5;
    let (mut low, mut high) = (i32::MAX, i32::MIN);
    for p in pitches {
        low = low.min(p.step);
        high = high.max(p.step);
        ledger_lines(out, x, p.step, staff_top);
        if let Some(acc) = p.accidental {
            text(out, "abc-accidental", x - 12.0, step_y(p.step, staff_top) + 4.0, 14.0, "middle", acc.glyph());
        }
        note_head(out, x, step_y(p.step, staff_top), filled);
    }
    if length >= 1.0 {
        return;
    }
    let up = (low + high) / 2 < MIDDLE_LINE_STEP;
    let (stem_x, from, to) = if up {
        let from = step_y(low, staff_top);
        (x + 5.0, from, step_y(high, staff_top) - STEM_LENGTH)
    } else {
        let from = step_y(high, staff_top);
        (x - 5.0, from, step_y(low, staff_top) + STEM_LENGTH)
    };
    line(out, stem_x, from, stem_x, to, 1.2);
    let flags: u8 = if length <= 1.0 / 16.0 {
        2
    } else if length <= 1.0 / 8.0 {
        1
    } else {
        0
    };
    for i in 0..flags {
        let offset = f64::from(i) * 6.0;
        let (y1, y2) = if up {
            (to + offset, to + offset + 10.0)
        } else {
            (to - offset, to - offset - 10.0)
        };
        line(out, stem_x, y1, stem_x + 7.0, y2, 1.5);
    }
}

fn draw_rest(out: &mut String, x: f64, length: f64, staff_top: f64) {
    let (y, h, w) = if length >= 1.0 {
        (staff_top + LINE_GAP, 5.0, 10.0)
    } else if length >= 0.5 {
        (staff_top + 2.0 * LINE_GAP - 5.0, 5.0, 10.0)
    } else {
        (staff_top + LINE_GAP, 2.0 * LINE_GAP, 4.0)
    };
    out.push_str(&format!(
        "<rect class=\"abc-rest\" x=\"{:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" fill=\"currentColor\"/>",
        x - w / 2.0
    ));
}

fn repeat_dots(out: &mut String, x: f64, staff_top: f64) {
    for y in [staff_top + 1.5 * LINE_GAP, staff_top + 2.5 * LINE_GAP] {
        out.push_str(&format!(
            "<circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"1.8\" fill=\"currentColor\"/>"
        ));
    }
}

fn draw_bar(out: &mut String, x: f64, style: BarStyle, staff_top: f64) {
    let bottom = staff_top + 4.0 * LINE_GAP;
    match style {
        BarStyle::Single => line(out, x, staff_top, x, bottom, 1.0),
        BarStyle::Double => {
            line(out, x - 2.0, staff_top, x - 2.0, bottom, 1.0);
            line(out, x + 2.0, staff_top, x + 2.0, bottom, 1.0);
        }
        BarStyle::Final => {
            line(out, x - 3.0, staff_top, x - 3.0, bottom, 1.0);
            line(out, x + 1.0, staff_top, x + 1.0, bottom, 3.0);
        }
        BarStyle::RepeatStart => {
            line(out, x - 3.0, staff_top, x - 3.0, bottom, 3.0);
            line(out, x + 1.0, staff_top, x + 1.0, bottom, 1.0);
            repeat_dots(out, x + 5.0, staff_top);
        }
        BarStyle::RepeatEnd => {
            repeat_dots(out, x - 7.0, staff_top);
            line(out, x - 3.0, staff_top, x - 3.0, bottom, 1.0);
            line(out, x + 1.0, staff_top, x + 1.0, bottom, 3.0);
        }
    }
}

fn draw_tune(tune: &Tune, staff_width: f64) -> String {
    let mut body = String::new();
    let mut top = MARGIN;
    let mut width = staff_width;

    if let Some(title) = tune.title.as_deref().filter(|t| !t.is_empty()) {
        text(&mut body, "abc-title", staff_width / 2.0, top + 16.0, 18.0, "middle", title);
        top += 26.0;
    }
    if let Some(composer) = tune.composer.as_deref().filter(|c| !c.is_empty()) {
        text(&mut body, "abc-composer", staff_width - MARGIN, top + 12.0, 12.0, "end", composer);
        top += 18.0;
    }

    for (i, symbols) in tune.lines.iter().enumerate() {
        // Headroom above each staff for annotations and high notes.
        let staff_top = top + 30.0 + i as f64 * SYSTEM_HEIGHT;
        text(&mut body, "abc-clef", MARGIN + 2.0, staff_top + 34.0, 40.0, "start", "\u{1D11E}");
        let mut x = MARGIN + CLEF_SPACE;
        if i == 0 {
            if let Some(key) = tune.key.as_deref().filter(|k| !k.is_empty() && *k != "C") {
                text(&mut body, "abc-key", x, staff_top - 4.0, 11.0, "start", key);
            }
            if let Some(meter) = tune.meter.as_deref().filter(|m| *m != "none") {
                text(&mut body, "abc-meter", x + 4.0, staff_top + 26.0, 18.0, "middle", meter);
                x += 24.0;
            }
        }

        let mut pending: Vec<&str> = Vec::new();
        for symbol in symbols {
            match symbol {
                Symbol::Annotation(a) => {
                    pending.push(a);
                    continue;
                }
                Symbol::Bar(style) => {
                    x += BAR_ADVANCE / 2.0;
                    draw_bar(&mut body, x, *style, staff_top);
                    x += BAR_ADVANCE / 2.0;
                }
                Symbol::Note { pitch, length } => {
                    x += NOTE_ADVANCE / 2.0;
                    draw_notes(&mut body, x, std::slice::from_ref(pitch), *length, staff_top);
                    x += NOTE_ADVANCE / 2.0;
                }
                Symbol::Chord { pitches, length } => {
                    x += NOTE_ADVANCE / 2.0;
                    draw_notes(&mut body, x, pitches, *length, staff_top);
                    x += NOTE_ADVANCE / 2.0;
                }
                Symbol::Rest { length, visible } => {
                    x += NOTE_ADVANCE / 2.0;
                    if *visible {
                        draw_rest(&mut body, x, *length, staff_top);
                    }
                    x += NOTE_ADVANCE / 2.0;
                }
            }
            for a in pending.drain(..) {
                text(&mut body, "abc-annotation", x - NOTE_ADVANCE / 2.0, staff_top - 14.0, 12.0, "middle", a);
            }
        }

        let right = (staff_width - MARGIN).max(x + 10.0);
        width = width.max(right + MARGIN);
        for k in 0..5u8 {
            let y = staff_top + f64::from(k) * LINE_GAP;
            line(&mut body, MARGIN, y, right, y, 1.0);
        }
    }

    let height = top + 30.0 + tune.lines.len() as f64 * SYSTEM_HEIGHT;
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" class=\"abc-score\" width=\"{width:.0}\" height=\"{height:.0}\" viewBox=\"0 0 {width:.0} {height:.0}\">{body}</svg>"
    )
}

/// ABC tune → SVG score.
#[derive(Debug, Clone, Copy)]
pub struct AbcEngine {
    staff_width: f64,
}

impl Default for AbcEngine {
    fn default() -> Self {
        Self::new(DEFAULT_STAFF_WIDTH)
    }
}

impl AbcEngine {
    pub fn new(staff_width: f64) -> Self {
        Self { staff_width }
    }
}

impl NotationEngine for AbcEngine {
    fn render(&self, source: &str) -> Result<String, EngineError> {
        let start = Instant::now();
        let tune = parse_tune(source)?;
        if tune.lines.is_empty() {
            return Err(EngineError::Parse("tune has no music".into()));
        }
        let svg = draw_tune(&tune, self.staff_width);
        debug!(
            "abc: {} staff line(s), {} bytes of SVG in {:.1}ms",
            tune.lines.len(),
            svg.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(svg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNE: &str = "X:1\nT:Scale\nC:Trad.\nM:4/4\nL:1/4\nK:C\nCDEF|GABc|]\n";

    fn body(line: &str) -> Result<Vec<Symbol>, EngineError> {
        let mut tune = Tune {
            unit: 1.0,
            ..Tune::default()
        };
        BodyParser::new(line, 1, 0).parse(&mut tune)
    }

    fn lengths(line: &str) -> Vec<f64> {
        body(line)
            .unwrap()
            .into_iter()
            .filter_map(|s| match s {
                Symbol::Note { length, .. } => Some(length),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn header_fields_are_read() {
        let tune = parse_tune(TUNE).unwrap();
        assert_eq!(tune.title.as_deref(), Some("Scale"));
        assert_eq!(tune.composer.as_deref(), Some("Trad."));
        assert_eq!(tune.meter.as_deref(), Some("4/4"));
        assert_eq!(tune.key.as_deref(), Some("C"));
        assert_eq!(tune.unit, 0.25);
        assert_eq!(tune.lines.len(), 1);
    }

    #[test]
    fn note_lengths() {
        assert_eq!(lengths("C C2 C/2 C/ C3/2 C//"), vec![1.0, 2.0, 0.5, 0.5, 1.5, 0.25]);
    }

    #[test]
    fn octave_marks_and_case() {
        let steps: Vec<i32> = body("C c c' C,")
            .unwrap()
            .into_iter()
            .filter_map(|s| match s {
                Symbol::Note { pitch, .. } => Some(pitch.step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![0, 7, 14, -7]);
    }

    #[test]
    fn accidentals() {
        let symbols = body("^F _B =c ^^G __A").unwrap();
        let accs: Vec<_> = symbols
            .iter()
            .filter_map(|s| match s {
                Symbol::Note { pitch, .. } => pitch.accidental,
                _ => None,
            })
            .collect();
        assert_eq!(
            accs,
            vec![
                Accidental::Sharp,
                Accidental::Flat,
                Accidental::Natural,
                Accidental::DoubleSharp,
                Accidental::DoubleFlat
            ]
        );
    }

    #[test]
    fn bars_and_repeats() {
        let bars: Vec<BarStyle> = body("|: C :| D || E |]")
            .unwrap()
            .into_iter()
            .filter_map(|s| match s {
                Symbol::Bar(b) => Some(b),
                _ => None,
            })
            .collect();
        assert_eq!(
            bars,
            vec![
                BarStyle::RepeatStart,
                BarStyle::RepeatEnd,
                BarStyle::Double,
                BarStyle::Final
            ]
        );
    }

    #[test]
    fn chords_annotations_and_skipped_syntax() {
        let symbols = body("\"Am\"[ACE]2 (3abc {g}A- A> B !trill!c ~d z2 x").unwrap();
        assert!(matches!(&symbols[0], Symbol::Annotation(a) if a == "Am"));
        assert!(matches!(&symbols[1], Symbol::Chord { pitches, length } if pitches.len() == 3 && *length == 2.0));
        assert!(symbols.iter().any(|s| matches!(s, Symbol::Rest { visible: true, .. })));
        assert!(symbols.iter().any(|s| matches!(s, Symbol::Rest { visible: false, .. })));
    }

    #[test]
    fn inline_unit_length_change() {
        let tune = parse_tune("X:1\nL:1/8\nK:C\nC [L:1/4] C\n").unwrap();
        let lens: Vec<f64> = tune.lines[0]
            .iter()
            .filter_map(|s| match s {
                Symbol::Note { length, .. } => Some(*length),
                _ => None,
            })
            .collect();
        assert_eq!(lens, vec![0.125, 0.25]);
    }

    #[test]
    fn unexpected_character_reports_position() {
        let err = parse_tune("X:1\nK:C\nCD#E\n").unwrap_err();
        assert_eq!(
            err,
            EngineError::Parse("line 3, column 3: unexpected character '#'".into())
        );
    }

    #[test]
    fn unterminated_constructs_fail() {
        assert!(body("[CEG").is_err());
        assert!(body("\"Am C").is_err());
        assert!(body("!trill C").is_err());
        assert!(body("[]").is_err());
        assert!(body("^ C").is_err());
    }

    #[test]
    fn invalid_header_fields_fail() {
        assert!(parse_tune("X:one\nK:C\nC\n").is_err());
        assert!(parse_tune("X:1\nM:4-4\nK:C\nC\n").is_err());
        assert!(parse_tune("X:1\nL:1/0\nK:C\nC\n").is_err());
    }

    #[test]
    fn music_before_key_fails() {
        assert!(parse_tune("X:1\nCDE\nK:C\n").is_err());
    }

    #[test]
    fn missing_key_reads_everything_as_music() {
        let tune = parse_tune("CDEF|\nGABc|\n").unwrap();
        assert_eq!(tune.lines.len(), 2);
    }

    #[test]
    fn render_draws_one_head_per_note() {
        let svg = AbcEngine::default().render(TUNE).unwrap();
        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("<ellipse").count(), 8);
        assert!(svg.contains(">Scale</text>"));
    }

    #[test]
    fn render_is_deterministic() {
        let engine = AbcEngine::default();
        assert_eq!(engine.render(TUNE).unwrap(), engine.render(TUNE).unwrap());
    }

    #[test]
    fn long_lines_widen_the_score() {
        let long = format!("X:1\nK:C\n{}\n", "C".repeat(40));
        let svg = AbcEngine::new(300.0).render(&long).unwrap();
        assert!(!svg.contains("width=\"300\""), "{}", &svg[..80]);
    }

    #[test]
    fn empty_tune_is_an_error() {
        assert!(AbcEngine::default().render("X:1\nT:Nothing\nK:C\n").is_err());
    }
}
