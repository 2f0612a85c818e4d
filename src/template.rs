//! Message templates for the publisher
//!
//! `{n}` expands to the 1-based message number, `{{` and `}}` are literal
//! braces. `n` takes an optional integer format spec after a colon,
//! `[[fill]align][sign][0][width][type]`, e.g. `{n:03}` or `{n:>4}`.
//! Anything else inside braces is rejected when the template is parsed.

use thiserror::Error;

/// Placeholder name substituted with the message number
const INDEX_PLACEHOLDER: &str = "n";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}' (only {{n}} is supported)")]
    UnknownPlaceholder(String),

    #[error("unsupported format spec '{0}' for {{n}}")]
    UnsupportedFormat(String),

    #[error("unclosed '{{' at byte {0}")]
    Unclosed(usize),

    #[error("single '}}' at byte {0} (use '}}}}' for a literal brace)")]
    StrayClose(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    /// Padding goes between the sign and the digits
    AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Radix {
    Decimal,
    LowerHex,
    UpperHex,
    Octal,
    Binary,
}

/// Parsed format spec of an `{n:...}` placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexFormat {
    fill: char,
    align: Align,
    sign: Option<char>,
    width: usize,
    radix: Radix,
}

impl Default for IndexFormat {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: Align::Right,
            sign: None,
            width: 0,
            radix: Radix::Decimal,
        }
    }
}

impl IndexFormat {
    fn parse(spec: &str) -> Result<Self, TemplateError> {
        let unsupported = || TemplateError::UnsupportedFormat(spec.to_string());
        let chars: Vec<char> = spec.chars().collect();
        let mut format = IndexFormat::default();
        let mut i = 0;

        let mut explicit_fill = false;
        let mut explicit_align = false;
        if let Some(align) = chars.get(1).copied().and_then(parse_align) {
            format.fill = chars[0];
            format.align = align;
            explicit_fill = true;
            explicit_align = true;
            i = 2;
        } else if let Some(align) = chars.first().copied().and_then(parse_align) {
            format.align = align;
            explicit_align = true;
            i = 1;
        }

        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                format.sign = Some(c);
                i += 1;
            }
        }

        if chars.get(i) == Some(&'0') {
            if !explicit_fill {
                format.fill = '0';
            }
            if !explicit_align {
                format.align = Align::AfterSign;
            }
            i += 1;
        }

        let width_start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > width_start {
            let digits: String = chars[width_start..i].iter().collect();
            format.width = digits.parse().map_err(|_| unsupported())?;
        }

        if let Some(&c) = chars.get(i) {
            format.radix = match c {
                'd' => Radix::Decimal,
                'x' => Radix::LowerHex,
                'X' => Radix::UpperHex,
                'o' => Radix::Octal,
                'b' => Radix::Binary,
                _ => return Err(unsupported()),
            };
            i += 1;
        }

        if i != chars.len() {
            return Err(unsupported());
        }
        Ok(format)
    }

    fn apply(&self, n: u64) -> String {
        let digits = match self.radix {
            Radix::Decimal => n.to_string(),
            Radix::LowerHex => format!("{:x}", n),
            Radix::UpperHex => format!("{:X}", n),
            Radix::Octal => format!("{:o}", n),
            Radix::Binary => format!("{:b}", n),
        };
        // n is never negative, so '-' adds nothing
        let sign = match self.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        };

        let len = sign.chars().count() + digits.chars().count();
        let pad = self.width.saturating_sub(len);
        let fill = |count: usize| self.fill.to_string().repeat(count);

        match self.align {
            Align::Left => format!("{}{}{}", sign, digits, fill(pad)),
            Align::Right => format!("{}{}{}", fill(pad), sign, digits),
            Align::Center => {
                let left = pad / 2;
                format!("{}{}{}{}", fill(left), sign, digits, fill(pad - left))
            }
            Align::AfterSign => format!("{}{}{}", sign, fill(pad), digits),
        }
    }
}

fn parse_align(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index(IndexFormat),
}

/// Parsed `--message` template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse a template string
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, ch)) => field.push(ch),
                            None => return Err(TemplateError::Unclosed(pos)),
                        }
                    }
                    let (name, spec) = match field.split_once(':') {
                        Some((name, spec)) => (name, Some(spec)),
                        None => (field.as_str(), None),
                    };
                    if name != INDEX_PLACEHOLDER {
                        return Err(TemplateError::UnknownPlaceholder(field));
                    }
                    let format = match spec {
                        Some(spec) => IndexFormat::parse(spec)?,
                        None => IndexFormat::default(),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Index(format));
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::StrayClose(pos)),
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Render the payload for message number `n`
    pub fn render(&self, n: u64) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Index(format) => out.push_str(&format.apply(n)),
            }
        }
        out
    }

    /// Whether the rendered payload changes with the message number
    pub fn is_numbered(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Index(_)))
    }
}
