//! Descriptive per-source profiles: artist concentration, diversity and
//! rough genre mix from title/artist keywords.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::models::{ArtistCount, PerSourceTracks, RawTrack, SourceProfile};

/// Artists listed in `top_artists`
const TOP_ARTISTS: usize = 10;

/// Substring keywords per genre, matched against lowercased "title artist".
/// Crude on purpose: a track can count toward several genres or none.
pub const GENRE_KEYWORDS: &[(&str, &[&str])] = &[
    ("ballad", &["발라드", "ballad", "사랑", "그리움", "눈물", "이별"]),
    ("dance", &["댄스", "dance", "파티", "party", "클럽", "club"]),
    ("hiphop", &["랩", "rap", "hip", "hop", "힙합", "cypher"]),
    ("rock", &["록", "rock", "밴드", "band", "기타", "guitar"]),
    ("trot", &["트로트", "뽕짝", "홍진영", "진도"]),
    ("indie", &["인디", "indie", "어쿠스틱", "acoustic"]),
    ("electronic", &["일렉", "electronic", "edm", "techno"]),
];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(100.0 * part as f64 / whole as f64)
    }
}

/// Genres whose keywords appear in a track's title or artist.
pub fn matching_genres(track: &RawTrack) -> Vec<&'static str> {
    let text = format!("{} {}", track.title, track.artist).to_lowercase();
    GENRE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(genre, _)| *genre)
        .collect()
}

/// Profile one source's track list.
pub fn profile_source(tracks: &[RawTrack]) -> SourceProfile {
    let total = tracks.len();

    let mut artist_counts: FxHashMap<&str, usize> = FxHashMap::default();
    for track in tracks {
        let artist = track.artist.trim();
        if !artist.is_empty() {
            *artist_counts.entry(artist).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = artist_counts.iter().map(|(&a, &c)| (a, c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_ARTISTS);

    let top_total: usize = ranked.iter().map(|(_, c)| c).sum();
    let top_artists = ranked
        .into_iter()
        .map(|(artist, count)| ArtistCount {
            artist: artist.to_string(),
            count,
            percentage: share(count, total),
        })
        .collect();

    let mut genre_hits: BTreeMap<String, usize> = GENRE_KEYWORDS
        .iter()
        .map(|(genre, _)| (genre.to_string(), 0))
        .collect();
    for track in tracks {
        for genre in matching_genres(track) {
            if let Some(hits) = genre_hits.get_mut(genre) {
                *hits += 1;
            }
        }
    }

    let title_chars: usize = tracks.iter().map(|t| t.title.chars().count()).sum();

    SourceProfile {
        total_tracks: total,
        unique_artists: artist_counts.len(),
        diversity_score: share(artist_counts.len(), total),
        top_artists,
        top10_dominance: share(top_total, total),
        genre_share: genre_hits
            .into_iter()
            .map(|(genre, hits)| (genre, share(hits, total)))
            .collect(),
        avg_title_length: if total == 0 {
            0.0
        } else {
            round2(title_chars as f64 / total as f64)
        },
    }
}

/// Profiles for every source in `per_source`.
pub fn profile_sources(per_source: &PerSourceTracks) -> BTreeMap<String, SourceProfile> {
    per_source
        .iter()
        .map(|(source, tracks)| (source.clone(), profile_source(tracks)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, artist: &str) -> RawTrack {
        RawTrack::new(title, artist, 1, "melon", "realtime")
    }

    #[test]
    fn test_artist_dominance_and_diversity() {
        let tracks = vec![
            track("A1", "IU"),
            track("A2", "IU"),
            track("A3", "IU"),
            track("B1", "NewJeans"),
        ];
        let profile = profile_source(&tracks);
        assert_eq!(profile.total_tracks, 4);
        assert_eq!(profile.unique_artists, 2);
        assert_eq!(profile.diversity_score, 50.0);
        assert_eq!(profile.top_artists[0].artist, "IU");
        assert_eq!(profile.top_artists[0].count, 3);
        assert_eq!(profile.top_artists[0].percentage, 75.0);
        assert_eq!(profile.top10_dominance, 100.0);
        assert_eq!(profile.avg_title_length, 2.0);
    }

    #[test]
    fn test_genre_keywords() {
        assert_eq!(matching_genres(&track("Party Rock Anthem", "LMFAO")), vec!["dance", "rock"]);
        assert_eq!(matching_genres(&track("사랑은 늘 도망가", "임영웅")), vec!["ballad"]);
        assert!(matching_genres(&track("Ditto", "NewJeans")).is_empty());

        let profile = profile_source(&[track("Club Night", "X"), track("Quiet", "Y")]);
        assert_eq!(profile.genre_share["dance"], 50.0);
        assert_eq!(profile.genre_share["trot"], 0.0);
        assert_eq!(profile.genre_share.len(), GENRE_KEYWORDS.len());
    }

    #[test]
    fn test_empty_source_profile() {
        let profile = profile_source(&[]);
        assert_eq!(profile.total_tracks, 0);
        assert_eq!(profile.diversity_score, 0.0);
        assert!(profile.top_artists.is_empty());
        assert_eq!(profile.avg_title_length, 0.0);
    }
}
