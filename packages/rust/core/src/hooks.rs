//! Static hook text and readable file names for selected clips.

use khive_shared::{Event, HookFraming, year_of};

const MIN_HOOK_LEN: usize = 10;
const MAX_HOOK_LEN: usize = 65;

/// Framing from the player's answer: `après` recaps, anything else teases.
pub fn framing_for(answer: Option<&str>) -> HookFraming {
    match answer.map(|a| fold_accents(&a.trim().to_lowercase())) {
        Some(a) if a == "apres" => HookFraming::PostEvent,
        _ => HookFraming::PreEvent,
    }
}

/// Keyword-driven hook for `event`. Falls back to a generic line rotated by
/// `tour` when no keyword matches.
pub fn generate_hook(event: &Event, tour: u32, framing: HookFraming) -> String {
    let year = year_of(&event.date);
    let title = event.title.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| title.contains(w));

    let hook = match framing {
        HookFraming::PreEvent => {
            if has(&["victoire", "bataille", "guerre"]) {
                format!("{year}. Cette bataille... avant ou après ?")
            } else if has(&["mort", "décès", "assassinat"]) {
                format!("{year}. Tu situes cette date ?")
            } else if has(&["france", "français", "paris"]) {
                format!("{year}. Un moment de l'Histoire de France.")
            } else if has(&["découverte", "invention"]) {
                format!("{year}. Cette découverte... avant ou après ?")
            } else if has(&["traité", "signature", "accord"]) {
                format!("{year}. Ce traité historique...")
            } else {
                let generic = [
                    format!("{year}. Avant ou après ? Tu saurais ?"),
                    format!("{year}. Évident ou piège ?"),
                    format!("{year}. T'aurais trouvé ?"),
                    format!("{year}. Facile... ou pas ?"),
                ];
                generic[tour as usize % generic.len()].clone()
            }
        }
        HookFraming::PostEvent => {
            if has(&["victoire", "bataille", "guerre"]) {
                format!("{year}. Cette bataille a tout changé.")
            } else if has(&["traité", "signature", "accord"]) {
                format!("{year}. Un traité qu'on oublie trop vite.")
            } else {
                let generic = [
                    format!("{year}. Tu l'avais bien placé ?"),
                    format!("{year}. La réponse t'a surpris ?"),
                    format!("{year}. Plus tard que tu pensais ?"),
                ];
                generic[tour as usize % generic.len()].clone()
            }
        }
    };

    if is_valid_hook(&hook) {
        hook
    } else {
        format!("{year}. Tu situes cette date ?")
    }
}

pub fn is_valid_hook(hook: &str) -> bool {
    (MIN_HOOK_LEN..=MAX_HOOK_LEN).contains(&hook.chars().count())
}

/// `clip_<up to three words longer than three letters>_<year>.mp4`.
pub fn readable_filename(event: &Event) -> String {
    let year = year_of(&event.date);
    let cleaned: String = fold_accents(&event.title.to_lowercase())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let subject: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .take(3)
        .collect();

    format!("clip_{}_{year}.mp4", subject.join("_"))
}

/// Replace accented Latin letters with their base letter.
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'À' | 'Á' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
            'ç' => 'c',
            'Ç' => 'C',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'È' | 'É' | 'Ê' | 'Ë' => 'E',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
            'Ò' | 'Ó' | 'Ô' | 'Ö' | 'Õ' => 'O',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
            'ý' | 'ÿ' => 'y',
            other => other,
        })
        .collect()
}
