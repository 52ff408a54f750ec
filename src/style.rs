//! Style and font resolution.
//!
//! Picks the best available font family for Latin and Cyrillic text, exposes
//! the two font roles used by every block and maps verdict strings to colours.
//! The resolved [`StyleBinding`] is immutable; [`init_styles`] resolves and
//! memoises it for the process lifetime while [`resolve_styles_in`] builds a
//! fresh one for callers (tests) that need isolation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use ttf_parser::{Face, FaceParsingError, GlyphId};

use crate::normalize::DocumentType;

/// Directories searched after the configured font directory.
pub const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu",
    "/usr/share/fonts/TTF",
    "/usr/share/fonts/dejavu",
    "/usr/share/fonts/truetype/liberation",
    "/usr/share/fonts/liberation",
    "/usr/local/share/fonts",
];

/// Characters a family must map to count as covering Cyrillic.
const COVERAGE_SAMPLE: &[char] = &['Ж', 'я', 'Ё', 'ш'];

struct FamilyCandidate {
    family: &'static str,
    regular: &'static str,
    bold: &'static str,
}

/// Preferred families, best first. The built-in family is the last resort.
const FONT_CHAIN: &[FamilyCandidate] = &[
    FamilyCandidate {
        family: "DejaVu Sans",
        regular: "DejaVuSans.ttf",
        bold: "DejaVuSans-Bold.ttf",
    },
    FamilyCandidate {
        family: "Liberation Sans",
        regular: "LiberationSans-Regular.ttf",
        bold: "LiberationSans-Bold.ttf",
    },
];

pub const BUILTIN_FAMILY: &str = "Helvetica";

static STYLES: OnceLock<StyleBinding> = OnceLock::new();

/// Resolves the process-wide style binding, searching `font_dir` before the
/// system directories. Only the first call resolves; later calls return the
/// same binding whatever directory they pass.
pub fn init_styles(font_dir: Option<&Path>) -> &'static StyleBinding {
    STYLES.get_or_init(|| resolve_styles_in(&font_search_dirs(font_dir)))
}

/// Returns the process-wide style binding, resolving it from the system
/// directories if [`init_styles`] has not run yet.
pub fn resolve_styles() -> &'static StyleBinding {
    init_styles(None)
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: not a usable font: {source}")]
    Parse {
        path: PathBuf,
        source: FaceParsingError,
    },

    #[error("no glyph for '{0}'")]
    MissingGlyph(char),
}

/// Search order: the configured directory (if any), then the system ones.
pub fn font_search_dirs(configured: Option<&Path>) -> Vec<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(SYSTEM_FONT_DIRS.iter().map(PathBuf::from))
        .collect()
}

/// Walks the font fallback chain over `dirs`.
///
/// Never fails: when no Unicode-capable family is found the built-in family
/// is used and a warning is recorded on the binding.
pub fn resolve_styles_in(dirs: &[PathBuf]) -> StyleBinding {
    for candidate in FONT_CHAIN {
        for dir in dirs {
            match load_family(dir, candidate) {
                Ok((body, bold)) => {
                    log::info!(
                        "Using font family '{}' from {}",
                        candidate.family,
                        dir.display()
                    );
                    return StyleBinding {
                        family: candidate.family.to_string(),
                        body: FontFace::Embedded(body),
                        bold: FontFace::Embedded(bold),
                        palette: Palette::default(),
                        warnings: Vec::new(),
                    };
                }
                Err(reason) => {
                    log::debug!(
                        "Font family '{}' not usable from {}: {}",
                        candidate.family,
                        dir.display(),
                        reason
                    );
                }
            }
        }
    }

    let warning = format!(
        "No Unicode-capable font family found in {} director{}; falling back to built-in {}, non-Latin text may render incorrectly",
        dirs.len(),
        if dirs.len() == 1 { "y" } else { "ies" },
        BUILTIN_FAMILY
    );
    log::warn!("{}", warning);
    let mut binding = StyleBinding::builtin();
    binding.warnings.push(warning);
    binding
}

fn load_family(
    dir: &Path,
    candidate: &FamilyCandidate,
) -> Result<(EmbeddedFont, EmbeddedFont), FontError> {
    let body = EmbeddedFont::load(&dir.join(candidate.regular))?;
    let bold = EmbeddedFont::load(&dir.join(candidate.bold))?;
    if let Some(missing) = body.first_unmapped(COVERAGE_SAMPLE) {
        return Err(FontError::MissingGlyph(missing));
    }
    Ok((body, bold))
}

/// Outcome of a test or of a whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Pending,
}

impl Verdict {
    /// The one place verdict strings are interpreted. Case and inner
    /// whitespace are ignored.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw
            .split(|c: char| c.is_whitespace() || c == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        match normalized.as_str() {
            "pass" | "qualified" => Verdict::Pass,
            "fail" | "not qualified" => Verdict::Fail,
            _ => Verdict::Pending,
        }
    }

    /// Short label shown in per-test result cells.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Pending => "N/T",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);
    pub const GREY: Rgb = Rgb::new(0.5, 0.5, 0.5);
    pub const LIGHT_GREY: Rgb = Rgb::new(0.827, 0.827, 0.827);
}

/// Verdict → colour mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Palette {
    pub affirmative: Rgb,
    pub negative: Rgb,
    pub neutral: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            affirmative: Rgb::new(0.0, 0.5, 0.0),
            negative: Rgb::new(1.0, 0.0, 0.0),
            neutral: Rgb::new(1.0, 0.647, 0.0),
        }
    }
}

impl Palette {
    pub fn color(&self, verdict: Verdict) -> Rgb {
        match verdict {
            Verdict::Pass => self.affirmative,
            Verdict::Fail => self.negative,
            Verdict::Pending => self.neutral,
        }
    }
}

/// Band and header colours of one document type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accent {
    pub band: Rgb,
    pub header_fill: Rgb,
}

pub fn accent(document_type: DocumentType) -> Accent {
    match document_type {
        DocumentType::Specification => Accent {
            band: Rgb::new(0.0, 0.0, 0.545),
            header_fill: Rgb::new(0.678, 0.847, 0.902),
        },
        DocumentType::QualificationRecord => Accent {
            band: Rgb::new(0.545, 0.0, 0.0),
            header_fill: Rgb::new(1.0, 0.894, 0.882),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FontRole {
    Body,
    Bold,
}

/// A font program that can be embedded into the output document.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    pub name: String,
    data: Arc<[u8]>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
    pub cap_height: i16,
    pub bbox: [i16; 4],
}

impl EmbeddedFont {
    pub fn load(path: &Path) -> Result<Self, FontError> {
        let data = fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data).map_err(|source| FontError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FaceParsingError> {
        let face = Face::parse(&data, 0)?;
        let name = face
            .names()
            .into_iter()
            .filter(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .find_map(|n| n.to_string())
            .unwrap_or_else(|| "EmbeddedFont".to_string());
        let bbox = face.global_bounding_box();
        let font = EmbeddedFont {
            name: name.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect(),
            units_per_em: face.units_per_em(),
            ascender: face.ascender(),
            descender: face.descender(),
            cap_height: face.capital_height().unwrap_or(face.ascender()),
            bbox: [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max],
            data: Arc::from(data),
        };
        Ok(font)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, 0).ok()
    }

    fn first_unmapped(&self, sample: &[char]) -> Option<char> {
        let face = self.face()?;
        sample.iter().copied().find(|ch| face.glyph_index(*ch).is_none())
    }

    /// Scales a font-unit value to the 1000-unit glyph space.
    pub fn to_glyph_space(&self, units: f32) -> f32 {
        units * 1000.0 / f32::from(self.units_per_em.max(1))
    }

    /// Glyph id and advance (in glyph space) for each character.
    pub fn glyphs(&self, text: &str) -> Vec<(char, u16, f32)> {
        let Some(face) = self.face() else {
            return text.chars().map(|ch| (ch, 0, 500.0)).collect();
        };
        text.chars()
            .map(|ch| {
                let gid = face.glyph_index(ch).map(|g| g.0).unwrap_or(0);
                let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
                (ch, gid, self.to_glyph_space(f32::from(advance)))
            })
            .collect()
    }
}

/// The font bound to one role.
#[derive(Debug, Clone)]
pub enum FontFace {
    /// One of the standard PDF fonts, WinAnsi encoded.
    Builtin(&'static str),
    Embedded(EmbeddedFont),
}

impl FontFace {
    pub fn name(&self) -> &str {
        match self {
            FontFace::Builtin(name) => name,
            FontFace::Embedded(font) => &font.name,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, FontFace::Embedded(_))
    }

    /// Width of `text` in points at `size`.
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: f32 = match self {
            FontFace::Builtin(name) => {
                let bold = name.contains("Bold");
                text.chars().map(|ch| builtin_advance(ch, bold)).sum()
            }
            FontFace::Embedded(font) => font.glyphs(text).iter().map(|(_, _, w)| w).sum(),
        };
        units * size / 1000.0
    }
}

/// Approximate Helvetica advances in glyph space.
fn builtin_advance(ch: char, bold: bool) -> f32 {
    let base = match ch {
        ' ' | '.' | ',' | ':' | ';' | '!' | '|' | '\'' => 278.0,
        'i' | 'j' | 'l' => 222.0,
        'f' | 't' | 'I' | '/' | '(' | ')' | '-' => 333.0,
        'm' | 'M' => 833.0,
        'w' | 'W' => 778.0,
        '0'..='9' | '_' | '$' => 556.0,
        'a'..='z' => 556.0,
        'A'..='Z' => 667.0,
        '°' => 400.0,
        _ => 584.0,
    };
    if bold {
        base * 1.06
    } else {
        base
    }
}

/// Resolved font roles plus verdict colours.
#[derive(Debug, Clone)]
pub struct StyleBinding {
    pub family: String,
    pub body: FontFace,
    pub bold: FontFace,
    pub palette: Palette,
    /// Non-fatal problems met while resolving fonts.
    pub warnings: Vec<String>,
}

impl StyleBinding {
    /// The minimal built-in family; always available.
    pub fn builtin() -> Self {
        Self {
            family: BUILTIN_FAMILY.to_string(),
            body: FontFace::Builtin("Helvetica"),
            bold: FontFace::Builtin("Helvetica-Bold"),
            palette: Palette::default(),
            warnings: Vec::new(),
        }
    }

    pub fn font(&self, role: FontRole) -> &FontFace {
        match role {
            FontRole::Body => &self.body,
            FontRole::Bold => &self.bold,
        }
    }

    pub fn verdict_color(&self, raw_verdict: &str) -> Rgb {
        self.palette.color(Verdict::parse(raw_verdict))
    }

    pub fn supports_unicode(&self) -> bool {
        self.body.is_embedded() && self.bold.is_embedded()
    }

    /// Role → font name, e.g. for diagnostics.
    pub fn role_names(&self) -> BTreeMap<FontRole, String> {
        [FontRole::Body, FontRole::Bold]
            .into_iter()
            .map(|role| (role, self.font(role).name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_vocabulary() {
        assert_eq!(Verdict::parse("pass"), Verdict::Pass);
        assert_eq!(Verdict::parse("Qualified"), Verdict::Pass);
        assert_eq!(Verdict::parse("FAIL"), Verdict::Fail);
        assert_eq!(Verdict::parse("Not Qualified"), Verdict::Fail);
        assert_eq!(Verdict::parse("  not   qualified "), Verdict::Fail);
        assert_eq!(Verdict::parse("not_qualified"), Verdict::Fail);
        assert_eq!(Verdict::parse(""), Verdict::Pending);
        assert_eq!(Verdict::parse("pending"), Verdict::Pending);
        assert_eq!(Verdict::parse("N/A"), Verdict::Pending);
    }

    #[test]
    fn test_verdict_colors() {
        let styles = StyleBinding::builtin();
        let palette = Palette::default();
        assert_eq!(styles.verdict_color("Qualified"), palette.affirmative);
        assert_eq!(styles.verdict_color("Not Qualified"), palette.negative);
        assert_eq!(styles.verdict_color("whatever"), palette.neutral);
    }

    #[test]
    fn test_empty_dirs_fall_back_to_builtin_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let styles = resolve_styles_in(&[dir.path().to_path_buf()]);
        assert_eq!(styles.family, BUILTIN_FAMILY);
        assert!(!styles.supports_unicode());
        assert_eq!(styles.warnings.len(), 1);
        assert_eq!(styles.body.name(), "Helvetica");
        assert_eq!(styles.bold.name(), "Helvetica-Bold");
    }

    #[test]
    fn test_corrupt_font_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DejaVuSans.ttf"), b"not a font").unwrap();
        std::fs::write(dir.path().join("DejaVuSans-Bold.ttf"), b"not a font").unwrap();
        let styles = resolve_styles_in(&[dir.path().to_path_buf()]);
        assert_eq!(styles.family, BUILTIN_FAMILY);
    }

    #[test]
    fn test_font_errors_name_the_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.ttf");
        match EmbeddedFont::load(&missing) {
            Err(FontError::Read { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected read error, got {other:?}"),
        }

        let corrupt = dir.path().join("corrupt.ttf");
        std::fs::write(&corrupt, b"not a font").unwrap();
        match EmbeddedFont::load(&corrupt) {
            Err(FontError::Parse { path, .. }) => assert_eq!(path, corrupt),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert_eq!(FontError::MissingGlyph('Ж').to_string(), "no glyph for 'Ж'");
    }

    #[test]
    fn test_process_styles_resolve_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_styles(Some(dir.path()));
        let second = init_styles(None);
        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(first, resolve_styles()));
    }

    #[test]
    fn test_search_dirs_put_configured_first() {
        let dirs = font_search_dirs(Some(Path::new("/opt/fonts")));
        assert_eq!(dirs[0], PathBuf::from("/opt/fonts"));
        assert_eq!(dirs.len(), SYSTEM_FONT_DIRS.len() + 1);
    }

    #[test]
    fn test_builtin_text_width_grows_with_text() {
        let font = FontFace::Builtin("Helvetica");
        let short = font.text_width("PA", 10.0);
        let long = font.text_width("PA, PB, PC", 10.0);
        assert!(short > 0.0);
        assert!(long > short);
    }
}
