/// Number of cards requested when the caller does not say.
pub const DEFAULT_CARD_COUNT: u32 = 10;

/// Build the flashcard generation prompt. `source_text` is expected to be
/// normalized already; `card_count` is embedded verbatim.
pub fn build_flashcard_prompt(source_text: &str, card_count: u32) -> String {
    format!(
        r#"Analysez ce texte et générez exactement {count} flashcards au format suivant. Chaque flashcard doit être numérotée et suivre ce format strict :

FLASHCARD 1:
Q: [Question claire et précise]
A: [Réponse complète et détaillée]

FLASHCARD 2:
Q: [Question claire et précise]
A: [Réponse complète et détaillée]

... et ainsi de suite jusqu'à FLASHCARD {count}.

Règles importantes :
- Les questions doivent être variées (définitions, concepts, applications, etc.)
- Les réponses doivent être complètes mais concises
- Couvrez les points les plus importants du texte
- Utilisez un langage clair et accessible

Texte à analyser :
{source}"#,
        count = card_count,
        source = source_text
    )
}
