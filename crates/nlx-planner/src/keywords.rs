//! Keyword heuristics shared across the planning stages.

use regex::Regex;
use std::sync::LazyLock;

const MUSIC_KEYWORDS: &[&str] = &[
    "music",
    "song",
    "melody",
    "tune",
    "soundtrack",
    "audio",
    "track",
    "beat",
];

const IMAGE_KEYWORDS: &[&str] = &[
    "image",
    "picture",
    "photo",
    "photograph",
    "art",
    "artwork",
    "drawing",
    "painting",
    "draw",
    "paint",
    "sketch",
    "render",
    "rendering",
    "visual",
    "illustration",
    "wallpaper",
    "graphic",
    "poster",
    "logo",
    "illustrate",
];

const SAVE_KEYWORDS: &[&str] = &["save", "download", "store", "export", "copy"];

pub fn mentions_music(text: &str) -> bool {
    MUSIC_KEYWORDS.iter().any(|k| text.contains(k))
}

pub fn mentions_image(text: &str) -> bool {
    IMAGE_KEYWORDS.iter().any(|k| text.contains(k))
}

pub fn mentions_save(text: &str) -> bool {
    SAVE_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Detect pure informational Q&A and conversational inputs.
///
/// These bypass planning entirely — a single history-aware `llm_generate`
/// answers them without approval.
pub fn is_informational_query(lower_input: &str) -> bool {
    if lower_input.contains('?') {
        return true;
    }

    const CONVERSATIONAL: &[&str] = &[
        "hello",
        "hi",
        "hey",
        "good morning",
        "good afternoon",
        "good evening",
        "thanks",
        "thank you",
        "bye",
        "goodbye",
        "how are you",
        "what's up",
        "greetings",
        "howdy",
        "bonjour",
        "hola",
        "ciao",
        "salut",
    ];
    if CONVERSATIONAL.iter().any(|p| lower_input.contains(p)) {
        return true;
    }

    const STARTERS: &[&str] = &[
        "what",
        "who",
        "when",
        "where",
        "why",
        "how",
        "explain",
        "tell me",
        "summarize",
        "summary of",
        "define",
        "describe",
        "compare",
        "difference between",
        "translate",
        "meaning of",
        "calculate",
        "compute",
        "can you",
        "could you",
        "would you",
        "please",
    ];
    if STARTERS.iter().any(|s| lower_input.starts_with(s)) {
        return true;
    }

    // Obvious imperative system intents go to the planner instead.
    const IMPERATIVES: &[&str] = &[
        "open",
        "create",
        "write",
        "save",
        "move",
        "delete",
        "list files",
        "search files",
        "run",
        "execute",
        "install",
        "generate",
        "song",
        "music",
        "ocr",
        "web search",
    ];
    if IMPERATIVES.iter().any(|k| lower_input.contains(k)) {
        return false;
    }

    // Short declarative informational prompts.
    lower_input.split_whitespace().count() >= 3
        && ["info", "information", "overview", "guide"]
            .iter()
            .any(|w| lower_input.contains(w))
}

static EXPLICIT_MUSIC: &[&str] = &[
    "generate music",
    "generate a song",
    "generate song",
    "create music",
    "create a song",
    "create song",
    "make music",
    "make a song",
    "make song",
    "compose music",
    "compose a song",
    "compose song",
];

static IMPLICIT_MUSIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^a\s+song\s+(about|of|for|with)",
        r"^an?\s+.*\s+song\s+(about|of|for|with)",
        r".*\s+song\s+about",
        r".*\s+music\s+(about|of|for|with|in)",
        r"^(medieval|rock|jazz|classical|electronic|folk|pop|metal|country|blues|hip.?hop|rap|r&b)\s+(song|music|tune)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Explicit "generate/create/make/compose song|music" phrasing.
pub fn is_explicit_music_request(lower_input: &str) -> bool {
    EXPLICIT_MUSIC.iter().any(|p| lower_input.contains(p))
}

/// Implicit music requests: a music keyword plus a descriptive shape
/// (pattern match, or short with no command verb).
pub fn is_implicit_music_request(lower_input: &str) -> bool {
    let has_keyword = ["song", "music", "tune", "melody", "track", "piece"]
        .iter()
        .any(|k| lower_input.contains(k));
    if !has_keyword {
        return false;
    }

    let matches_pattern = IMPLICIT_MUSIC_PATTERNS
        .iter()
        .any(|re| re.is_match(lower_input));
    let is_descriptive = lower_input.split_whitespace().count() <= 10;
    let is_not_command = !["run", "execute", "list", "show", "find", "search", "open"]
        .iter()
        .any(|c| lower_input.contains(c));

    matches_pattern || (is_descriptive && is_not_command)
}

/// Is this a music generation request at all?
///
/// "lyrics" and "text" requests are text generation, not music.
pub fn is_music_request(lower_input: &str) -> bool {
    if lower_input.contains("lyric") || lower_input.contains("text") {
        return false;
    }
    is_explicit_music_request(lower_input) || is_implicit_music_request(lower_input)
}

static MUSIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(generate|create|make|compose)\s+(?:a\s+|an\s+)?(?:song|music)\s*,?\s*")
        .expect("static regex")
});

static MUSIC_ALT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(generate|create|make|compose)\s+(.+?)\s+(?:music|song)").expect("static regex")
});

static TRAILING_SAVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+(save|store)\b.*$").expect("static regex"));

static MUSIC_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(generate|create|make|compose)\s+(.+)$").expect("static regex")
});

/// Extract the generation prompt from a music utterance.
///
/// Drops a trailing "and save it" clause and the action prefix
/// ("generate a song, …" or just the verb); when stripping leaves nothing,
/// tries the "<verb> <description> music" shape; a still-empty prompt falls
/// back to `default_prompt`.
pub fn extract_music_prompt(input: &str, default_prompt: &str) -> String {
    let trimmed = TRAILING_SAVE.replace(input.trim(), "").trim().to_string();

    let mut prompt = if MUSIC_PREFIX.is_match(&trimmed) {
        MUSIC_PREFIX.replace(&trimmed, "").trim().to_string()
    } else if let Some(caps) = MUSIC_VERB.captures(&trimmed) {
        let remainder = caps[2].trim().to_string();
        let lower = remainder.to_lowercase();
        if lower.contains("song") || lower.contains("music") {
            remainder
        } else {
            trimmed.clone()
        }
    } else {
        trimmed.clone()
    };

    if prompt.chars().count() < 3 {
        if let Some(caps) = MUSIC_ALT.captures(input.trim()) {
            prompt = caps[2].trim().trim_end_matches(',').to_string();
        }
    }

    if prompt.chars().count() < 3 {
        default_prompt.to_string()
    } else {
        prompt
    }
}
