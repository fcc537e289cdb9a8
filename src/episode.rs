//! Episode identity values produced by the matcher.

use std::fmt;

/// A TV show, identified by its normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TVShow {
    pub name: String,
}

impl TVShow {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One episode of a show: the show, its season and its number within the season.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Episode {
    pub tvshow: TVShow,
    pub season: u32,
    pub number: u32,
}

impl Episode {
    pub fn new(tvshow: TVShow, season: u32, number: u32) -> Self {
        Self {
            tvshow,
            season,
            number,
        }
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} S{:02}E{:02}",
            self.tvshow.name, self.season, self.number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_display() {
        let episode = Episode::new(TVShow::new("Prison Break"), 5, 9);
        assert_eq!(episode.to_string(), "Prison Break S05E09");

        let episode = Episode::new(TVShow::new("Doctor Who"), 108, 1234);
        assert_eq!(episode.to_string(), "Doctor Who S108E1234");
    }

    #[test]
    fn test_episode_equality_is_by_value() {
        let a = Episode::new(TVShow::new("Castle 2009"), 8, 22);
        let b = Episode::new(TVShow::new("Castle 2009".to_string()), 8, 22);
        assert_eq!(a, b);
        assert_ne!(a, Episode::new(TVShow::new("Castle 2009"), 8, 21));
    }
}
