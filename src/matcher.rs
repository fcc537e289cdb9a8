//! Episode name matching.
//!
//! Release names carry the show name followed by an episode marker and then
//! arbitrary tags:
//!
//! ```text
//! Prison.Break.S05E09.720p.HDTV.x264-KILLERS[rarbg].mkv
//! Mr. Robot 1x02
//! ```
//!
//! Two marker syntaxes are recognized: `S<season>[x]E<number>` (the `S` and
//! `E` in any case) and `<season>x<number>`. The marker must follow a
//! separator (`.` or a space) and be followed by a separator, a `-` or the
//! end of the name.
//!
//! # Examples
//!
//! ```
//! use episode_organizer::matcher::Matcher;
//!
//! let episode = Matcher::new().match_name("castle.2009.s08e22.x264").unwrap();
//! assert_eq!(episode.tvshow.name, "Castle 2009");
//! assert_eq!((episode.season, episode.number), (8, 22));
//! ```

use crate::episode::{Episode, TVShow};
use regex::Regex;
use thiserror::Error;

/// Characters that separate the words of a release name.
const SEPARATORS: [char; 2] = ['.', ' '];

/// Matches a marker at the very start of the input. The season syntax is the
/// first alternative so it wins when both could match at one position.
const MARKER_PATTERN: &str = r"^(?:[Ss](?P<season>[0-9]+)x?[Ee](?P<number>[0-9]+)|(?P<alt_season>[0-9]+)x(?P<alt_number>[0-9]+))(?:[. \-]|$)";

/// Errors returned by [`Matcher::match_name`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The name does not carry a recognizable episode marker.
    #[error("could not match name '{0}' to an episode")]
    NoMatch(String),
}

/// Parses release names into [`Episode`] values.
#[derive(Debug, Clone)]
pub struct Matcher {
    marker: Regex,
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            marker: Regex::new(MARKER_PATTERN).expect("Invalid episode marker pattern"),
        }
    }

    /// Matches `name` to an episode.
    ///
    /// The leftmost marker preceded by a separator decides the episode; the
    /// words before it, split on that separator, form the show name, which is
    /// title-cased. Anything after the marker is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NoMatch`] when no marker is found or when the
    /// first marker has no show name in front of it.
    pub fn match_name(&self, name: &str) -> Result<Episode, MatchError> {
        let no_match = || MatchError::NoMatch(name.to_string());

        for (index, separator) in name.char_indices() {
            if !SEPARATORS.contains(&separator) {
                continue;
            }

            let rest = &name[index + separator.len_utf8()..];
            let Some((season, number)) = self.parse_marker(rest) else {
                continue;
            };

            let show_name = normalize_show_name(&name[..index], separator).ok_or_else(no_match)?;
            return Ok(Episode::new(TVShow::new(show_name), season, number));
        }

        Err(no_match())
    }

    /// Parses a marker at the start of `text`, returning `(season, number)`.
    fn parse_marker(&self, text: &str) -> Option<(u32, u32)> {
        let captures = self.marker.captures(text)?;

        let season = captures
            .name("season")
            .or_else(|| captures.name("alt_season"))?;
        let number = captures
            .name("number")
            .or_else(|| captures.name("alt_number"))?;

        // Digit runs too long for u32 are not treated as markers.
        Some((season.as_str().parse().ok()?, number.as_str().parse().ok()?))
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns the text in front of a marker into a show name.
///
/// Returns `None` when nothing usable is left.
fn normalize_show_name(segment: &str, separator: char) -> Option<String> {
    let words: Vec<String> = segment
        .split(separator)
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect();

    let name = words.join(" ");
    // A name made only of dots would resolve to the library root or its parent.
    if name.trim_matches(|c| c == '.' || c == ' ').is_empty() {
        return None;
    }
    Some(name)
}

/// Capitalizes the first letter of every whitespace-separated word and
/// lowercases the rest.
fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(name: &str, season: u32, number: u32) -> Episode {
        Episode::new(TVShow::new(name), season, number)
    }

    #[test]
    fn test_valid_names() {
        let matcher = Matcher::new();
        let cases = [
            ("Prison.Break.S05E09.720p.x264-KRS", episode("Prison Break", 5, 9)),
            ("Castle.2009.S08E22.x264-KILS[rg]", episode("Castle 2009", 8, 22)),
            ("Prison.Break.S1E1", episode("Prison Break", 1, 1)),
            ("prison.break.S01E01", episode("Prison Break", 1, 1)),
            ("PRison.BrEAk.S01E01", episode("Prison Break", 1, 1)),
            ("prison.break.s01e01", episode("Prison Break", 1, 1)),
            ("prison.break.S01e01", episode("Prison Break", 1, 1)),
            ("prison.break.S01xE01", episode("Prison Break", 1, 1)),
            ("prison.break.s01xe01", episode("Prison Break", 1, 1)),
            ("prison.break.01x02", episode("Prison Break", 1, 2)),
            ("prison.break.1x2", episode("Prison Break", 1, 2)),
            ("prison.break.1x12", episode("Prison Break", 1, 12)),
            ("prison break 1x12", episode("Prison Break", 1, 12)),
            ("A.S01E02", episode("A", 1, 2)),
            ("A S01E02", episode("A", 1, 2)),
            ("Mr. Robot S01E02", episode("Mr. Robot", 1, 2)),
            ("Mr. Robot 1x02", episode("Mr. Robot", 1, 2)),
            ("Prison Break S01E02-S01E03", episode("Prison Break", 1, 2)),
            ("Doctor.Who.S108E01.mkv", episode("Doctor Who", 108, 1)),
        ];

        for (name, expected) in cases {
            assert_eq!(matcher.match_name(name), Ok(expected), "name: {}", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        let matcher = Matcher::new();
        let names = [
            "Prison.Break.720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.SE.720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.S1E.720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.SE1.720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.SaEa.1720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.S1E720p.HDTV.x264-KILLERS[rarbg]",
            "Prison.Break.11",
            "Prison.Break.S1x01",
            "Prison.Break.1xE01",
            "Show.720p.x264",
            "S01E01",
            "AS01E01",
            ".S01E01",
            " S01E01",
            "..S01E01",
            ".. S01E01",
            "Prison BreakS01E01",
            "Prison Break1x01",
            "",
        ];

        for name in names {
            assert_eq!(
                matcher.match_name(name),
                Err(MatchError::NoMatch(name.to_string())),
                "name: {}",
                name
            );
        }
    }

    #[test]
    fn test_first_marker_wins() {
        let matcher = Matcher::new();
        assert_eq!(
            matcher.match_name("Show.S02E03.Show.S04E05"),
            Ok(episode("Show", 2, 3))
        );
        assert_eq!(matcher.match_name("Show.1x02.S03E04"), Ok(episode("Show", 1, 2)));
    }

    #[test]
    fn test_doubled_separators_are_collapsed() {
        let matcher = Matcher::new();
        assert_eq!(
            matcher.match_name("Prison..Break.S01E01"),
            Ok(episode("Prison Break", 1, 1))
        );
    }

    #[test]
    fn test_synthesized_names_match_back() {
        let matcher = Matcher::new();
        let shows = [vec!["Lost"], vec!["Prison", "Break"], vec!["The", "Big", "Bang", "Theory"]];

        for words in &shows {
            for season in (0..=999).step_by(37) {
                for number in (0..=999).step_by(91) {
                    let name = format!("{}.S{}E{}.720p", words.join("."), season, number);
                    assert_eq!(
                        matcher.match_name(&name),
                        Ok(episode(&words.join(" "), season, number)),
                        "name: {}",
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("prison"), "Prison");
        assert_eq!(title_case("PRison"), "Prison");
        assert_eq!(title_case("mr."), "Mr.");
        assert_eq!(title_case("2009"), "2009");
    }
}
