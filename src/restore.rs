// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from the admin panel (TypeScript SDK format)

use spacetimedb::{reducer, ReducerContext, Timestamp, log, Table};
use crate::{User, Puzzle, CompletedResult, PlayerResult, profile_of, upsert_profile};
use crate::{user, puzzle, authorized_worker};
use serde_json::Value;

/// Parse Timestamp from SDK JSON format: {"__timestamp_micros_since_unix_epoch__": "123456"}
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

/// Parse a grid or solution cell array from SDK JSON: numbers with null blanks
fn parse_cells(val: &Value) -> Result<Vec<Option<u8>>, String> {
    let cells = val.as_array().ok_or("Expected cell array")?;
    cells.iter()
        .map(|cell| {
            if cell.is_null() {
                Ok(None)
            } else {
                cell.as_u64()
                    .filter(|d| *d <= 9)
                    .map(|d| Some(d as u8))
                    .ok_or_else(|| format!("Invalid cell value: {}", cell))
            }
        })
        .collect()
}

/// Parse CompletedResult from SDK JSON
fn parse_completed_result(val: &Value) -> Result<CompletedResult, String> {
    Ok(CompletedResult {
        puzzle_id: val.get("puzzleId")
            .and_then(|v| v.as_u64())
            .ok_or("Missing puzzleId")?,
        time: val.get("time")
            .and_then(|v| v.as_u64())
            .ok_or("Missing time")? as u32,
        points: val.get("points")
            .and_then(|v| v.as_u64())
            .ok_or("Missing points")? as u32,
    })
}

/// Parse PlayerResult from SDK JSON
fn parse_player_result(val: &Value) -> Result<PlayerResult, String> {
    Ok(PlayerResult {
        email: val.get("email")
            .and_then(|v| v.as_str())
            .ok_or("Missing email")?
            .to_string(),
        time: val.get("time")
            .and_then(|v| v.as_u64())
            .ok_or("Missing time")? as u32,
        points: val.get("points")
            .and_then(|v| v.as_u64())
            .ok_or("Missing points")? as u32,
    })
}

/// Bulk restore the user table (and its public profiles) from a JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_users(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_users attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let users = data.as_array()
        .ok_or("Expected JSON array of users")?;

    let mut count = 0;
    for (i, u) in users.iter().enumerate() {
        let completed_puzzles = u.get("completedPuzzles")
            .and_then(|v| v.as_array())
            .map(|results| results.iter().map(parse_completed_result).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))?;

        let user = User {
            id: u.get("id").and_then(|v| v.as_u64()).ok_or(format!("User {}: missing id", i))?,
            username: u.get("username").and_then(|v| v.as_str()).ok_or(format!("User {}: missing username", i))?.to_string(),
            email: u.get("email").and_then(|v| v.as_str()).ok_or(format!("User {}: missing email", i))?.to_lowercase(),
            password_hash: u.get("passwordHash").and_then(|v| v.as_str()).ok_or(format!("User {}: missing passwordHash", i))?.to_string(),
            date_joined: parse_timestamp_json(u.get("dateJoined").ok_or(format!("User {}: missing dateJoined", i))?)?,
            number_of_completed: u.get("numberOfCompleted").and_then(|v| v.as_u64()).unwrap_or(completed_puzzles.len() as u64) as u32,
            total_points: u.get("totalPoints").and_then(|v| v.as_u64()).unwrap_or(0),
            completed_puzzles,
        };

        let row = ctx.db.user().insert(user);
        upsert_profile(ctx, profile_of(&row));
        count += 1;
    }

    log::info!("✅ Restored {} user records", count);
    Ok(())
}

/// Bulk restore the puzzle table from a JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_puzzles(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_puzzles attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let puzzles = data.as_array()
        .ok_or("Expected JSON array of puzzles")?;

    let mut count = 0;
    for (i, p) in puzzles.iter().enumerate() {
        let player_results = p.get("playerResults")
            .and_then(|v| v.as_array())
            .map(|results| results.iter().map(parse_player_result).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))?;

        let likes: Vec<String> = p.get("likes")
            .and_then(|v| v.as_array())
            .map(|emails| {
                emails.iter()
                    .map(|e| e.as_str().map(|s| s.to_string()).ok_or("Invalid likes entry".to_string()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;

        let puzzle = Puzzle {
            id: p.get("id").and_then(|v| v.as_u64()).ok_or(format!("Puzzle {}: missing id", i))?,
            date_created: parse_timestamp_json(p.get("dateCreated").ok_or(format!("Puzzle {}: missing dateCreated", i))?)?,
            grid: parse_cells(p.get("grid").ok_or(format!("Puzzle {}: missing grid", i))?)?,
            solution: parse_cells(p.get("solution").ok_or(format!("Puzzle {}: missing solution", i))?)?,
            name: p.get("name").and_then(|v| v.as_str()).unwrap_or("untitled puzzle").to_string(),
            difficulty: p.get("difficulty").and_then(|v| v.as_u64()).map(|d| d as u8),  // Old backups have no difficulty field
            player_results,
            likes,
            number_of_likes: p.get("numberOfLikes").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        };

        ctx.db.puzzle().insert(puzzle);
        count += 1;
    }

    log::info!("✅ Restored {} puzzle records", count);
    Ok(())
}
