use crate::GenerationRequest;

/// Number of trailing history entries included in the prompt.
const HISTORY_WINDOW: usize = 10;

const STYLE_EXAMPLES: &str = r#"Examples of style:
- "Oh, moving the knight there? Bold strategy, let's see if it pays off... spoiler alert: it won't."
- "That's actually a decent move. I'm as shocked as you are."
- "Ah yes, the classic 'I have no idea what I'm doing' gambit. Timeless.""#;

/// Build the commentator prompt for one move.
pub fn commentary_prompt(request: &GenerationRequest) -> String {
    let skip = request.move_history.len().saturating_sub(HISTORY_WINDOW);
    let history = request.move_history[skip..].join(", ");

    format!(
        "You are a chess commentator with a dark, sarcastic sense of humor. \
You're commenting on a chess game in real-time.\n\n\
Current position (FEN): {fen}\n\
Last move: {mv}\n\
Player who made the move: {player}\n\
Move history: {history}\n\n\
Provide brief, witty commentary (1-2 sentences) on this move. Be funny but not mean-spirited. \
Roast bad moves, celebrate brilliant ones with backhanded compliments, and add personality. \
Keep it under 50 words.\n\n{STYLE_EXAMPLES}\n",
        fen = request.fen,
        mv = request.move_notation,
        player = request.player,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Player;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

    #[test]
    fn test_prompt_contains_move_details() {
        let request = GenerationRequest::new("e4", Player::Human, START_FEN);
        let prompt = commentary_prompt(&request);

        assert!(prompt.contains("Last move: e4"));
        assert!(prompt.contains("Player who made the move: human"));
        assert!(prompt.contains(START_FEN));
        assert!(prompt.contains("Move history: \n"));
    }

    #[test]
    fn test_prompt_keeps_last_ten_history_entries() {
        let history: Vec<String> = (1..=15).map(|n| format!("m{n}")).collect();
        let request =
            GenerationRequest::new("Nf3", Player::Computer, START_FEN).with_history(history);
        let prompt = commentary_prompt(&request);

        assert!(prompt.contains("Move history: m6, m7, m8, m9, m10, m11, m12, m13, m14, m15\n"));
        assert!(!prompt.contains("m5,"));
    }
}
