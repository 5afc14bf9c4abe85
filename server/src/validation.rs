use crate::error::ApiError;

/// Longest accepted move, e.g. `exd8=Q+` or `e7e8q`
const MAX_MOVE_LENGTH: usize = 16;
/// Longest accepted FEN string
const MAX_FEN_LENGTH: usize = 128;
/// Maximum number of history entries per request
const MAX_HISTORY_ENTRIES: usize = 1024;

/// Validate a move commentary request
pub fn validate_move_request(fen: &str, mv: &str, history: &[String]) -> Result<(), ApiError> {
    validate_move(mv)?;
    validate_fen(fen)?;

    if history.len() > MAX_HISTORY_ENTRIES {
        return Err(ApiError::InvalidInput(format!(
            "Move history too long (max {} entries)",
            MAX_HISTORY_ENTRIES
        )));
    }
    if let Some(bad) = history.iter().find(|m| !is_valid_move(m)) {
        return Err(ApiError::InvalidInput(format!("Invalid move in history: {}", bad)));
    }

    Ok(())
}

fn validate_move(mv: &str) -> Result<(), ApiError> {
    if mv.is_empty() {
        return Err(ApiError::InvalidInput("Move cannot be empty".to_string()));
    }
    if !is_valid_move(mv) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid move notation: {}. Expected SAN (e.g. Nf3, O-O) or UCI (e.g. e2e4)",
            mv
        )));
    }
    Ok(())
}

/// SAN or UCI alphabet, 1 to 16 characters
fn is_valid_move(mv: &str) -> bool {
    (1..=MAX_MOVE_LENGTH).contains(&mv.len())
        && mv.chars().all(|c| {
            matches!(
                c,
                'a'..='h'
                    | '1'..='8'
                    | 'K' | 'Q' | 'R' | 'B' | 'N'
                    | 'q' | 'r' | 'n'
                    | 'O' | '0' | '-'
                    | 'x' | '+' | '#' | '=' | '!' | '?'
            )
        })
}

/// Only the board field is checked: 8 ranks of pieces and empty-square counts
fn validate_fen(fen: &str) -> Result<(), ApiError> {
    if fen.trim().is_empty() {
        return Err(ApiError::InvalidInput("FEN cannot be empty".to_string()));
    }
    if fen.len() > MAX_FEN_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "FEN too long (max {} characters)",
            MAX_FEN_LENGTH
        )));
    }

    let board = fen.split_whitespace().next().unwrap_or_default();
    let ranks: Vec<&str> = board.split('/').collect();
    let valid = ranks.len() == 8
        && ranks.iter().all(|rank| {
            !rank.is_empty() && rank.chars().all(|c| "pnbrqkPNBRQK12345678".contains(c))
        });
    if !valid {
        return Err(ApiError::InvalidInput(format!("Invalid FEN board: {}", board)));
    }
    Ok(())
}
