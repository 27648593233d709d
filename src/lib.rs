use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp,
    table, reducer, view, SpacetimeType,
    client_visibility_filter, Filter,
};

mod generate;
mod paging;

// Bulk restore reducers for disaster recovery
mod restore;

use paging::{PageRequest, SortSpec};

// ==================== CONSTANTS ====================

/// Score submissions between automatic ranked-puzzle generations.
/// The counter fires once it exceeds this value, so every fourth
/// submission mints a new ranked puzzle.
const GENERATION_INTERVAL: u32 = 3;

/// Difficulty stamped onto generated puzzles (no grading pass yet)
const DEFAULT_DIFFICULTY: u8 = 3;

/// Default sort for the ranked catalog: newest first
const CATALOG_DEFAULT_SORT: &str = "-dateCreated";

/// Default sort for the leaderboard: highest score first
const LEADERBOARD_DEFAULT_SORT: &str = "-totalPoints";

// ==================== HELPER FUNCTIONS ====================

/// Resolve the sender's verified session to their user record.
/// This abstracts the session lookup pattern used by every protected reducer.
fn session_user(ctx: &ReducerContext) -> Result<User, String> {
    let session = ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("unauthorized: no verified session".to_string())?;

    ctx.db.user()
        .email()
        .find(&session.email)
        .ok_or("unauthorized: session user no longer exists".to_string())
}

/// Authorization check for gateway-only reducers
fn require_worker(ctx: &ReducerContext) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("[AUTH] unauthorized gateway call from {}", ctx.sender);
        return Err("unauthorized: only the gateway can call this".to_string());
    }
    Ok(())
}

/// Append one solve to the user's ledger and bump the aggregates.
/// At-least-once on purpose: there is no dedup key, so submitting the same
/// puzzle twice counts twice (the clients rely on replays being visible).
fn record_completion(user: &mut User, puzzle_id: u64, time: u32, points: u32) {
    user.completed_puzzles.push(CompletedResult { puzzle_id, time, points });
    user.total_points = user.total_points.saturating_add(points as u64);
    user.number_of_completed = user.number_of_completed.saturating_add(1);
}

/// Record one solve on the puzzle, keyed by the solver's email
fn append_player_result(puzzle: &mut Puzzle, email: &str, time: u32, points: u32) {
    puzzle.player_results.push(PlayerResult {
        email: email.to_string(),
        time,
        points,
    });
}

/// Flip the user's membership in the puzzle's likes and bump the toggle
/// counter. Returns whether the user likes the puzzle afterwards.
/// number_of_likes counts toggle events, NOT current likes: it goes up on
/// unlike too. Clients read it as an engagement stat, so keep it that way.
fn toggle_like_membership(puzzle: &mut Puzzle, email: &str) -> bool {
    let now_liked = match puzzle.likes.iter().position(|liker| liker == email) {
        Some(at) => {
            puzzle.likes.remove(at);
            false
        }
        None => {
            puzzle.likes.push(email.to_string());
            true
        }
    };
    puzzle.number_of_likes = puzzle.number_of_likes.saturating_add(1);
    now_liked
}

/// Advance the generation counter by one submission.
/// Fires (and resets) once the counter exceeds GENERATION_INTERVAL.
fn advance_generation_counter(counter: &mut u32) -> bool {
    *counter += 1;
    if *counter > GENERATION_INTERVAL {
        *counter = 0;
        return true;
    }
    false
}

/// Registration duplicate guard over the two unique-index lookups.
/// Either hit is a conflict and the existing record always wins; the caller
/// never inserts on Err, so exactly one account per username/email survives.
fn check_registration_conflict(username_hit: Option<User>, email_hit: Option<User>) -> Result<(), String> {
    if username_hit.is_some() || email_hit.is_some() {
        return Err("conflict: username or email is taken".to_string());
    }
    Ok(())
}

/// 1-based position of a page entry within the full sorted listing
fn page_position(skip: u64, offset: usize) -> u64 {
    skip + offset as u64 + 1
}

/// Public projection of a user: identity plus aggregates, never the hash
fn profile_of(user: &User) -> UserProfile {
    UserProfile {
        user_id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        date_joined: user.date_joined,
        completed_puzzles: user.completed_puzzles.clone(),
        number_of_completed: user.number_of_completed,
        total_points: user.total_points,
    }
}

/// Insert or replace the public profile row for a user
pub(crate) fn upsert_profile(ctx: &ReducerContext, profile: UserProfile) {
    if ctx.db.user_profile().user_id().find(&profile.user_id).is_some() {
        ctx.db.user_profile().user_id().update(profile);
    } else {
        ctx.db.user_profile().insert(profile);
    }
}

/// Tick the persistent generation counter; true means "mint a puzzle now".
/// The counter lives in a singleton row rather than process memory so the
/// every-Nth cadence survives restarts and concurrent submissions.
fn throttle_tick(ctx: &ReducerContext) -> bool {
    let mut row = match ctx.db.generation_counter().id().find(&0) {
        Some(row) => row,
        None => ctx.db.generation_counter().insert(GenerationCounter {
            id: 0,
            submissions_since_generation: 0,
        }),
    };
    let fires = advance_generation_counter(&mut row.submissions_since_generation);
    ctx.db.generation_counter().id().update(row);
    fires
}

/// Generate and store a new ranked puzzle, returning its id.
/// Zero digits from the generator are remapped to 9 before storage, so grids
/// and solutions only ever hold 1-9.
fn mint_ranked_puzzle(ctx: &ReducerContext, name: Option<String>) -> u64 {
    let raw = generate::generate(&mut ctx.rng());
    let name = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_puzzle_name(ctx.timestamp));

    let row = ctx.db.puzzle().insert(Puzzle {
        id: 0, // auto_inc
        date_created: ctx.timestamp,
        grid: generate::remap_zeroes(&raw.grid),
        solution: generate::remap_zeroes(&raw.solution),
        name,
        difficulty: Some(DEFAULT_DIFFICULTY),
        player_results: Vec::new(),
        likes: Vec::new(),
        number_of_likes: 0,
    });
    log::info!("[RANKED] created puzzle:{} name:{}", row.id, row.name);
    row.id
}

/// Name for auto-generated puzzles, stamped with the creation date
fn default_puzzle_name(now: Timestamp) -> String {
    let date = chrono::DateTime::from_timestamp_micros(now.to_micros_since_unix_epoch())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "untitled".to_string());
    format!("ranked puzzle {}", date)
}

/// Catalog comparator: applies the parsed sort key, then puzzle id for a
/// stable order. Unknown keys fall back to creation date.
fn compare_catalog(a: &Puzzle, b: &Puzzle, sort: &SortSpec) -> std::cmp::Ordering {
    let key_order = match sort.key.as_str() {
        "numberOfLikes" => a.number_of_likes.cmp(&b.number_of_likes),
        "name" => a.name.cmp(&b.name),
        "difficulty" => a.difficulty.cmp(&b.difficulty),
        _ => a.date_created.cmp(&b.date_created),
    };
    sort.direction.apply(key_order).then(a.id.cmp(&b.id))
}

/// Leaderboard comparator over public profiles. Unknown keys fall back to
/// total points.
fn compare_leaderboard(a: &UserProfile, b: &UserProfile, sort: &SortSpec) -> std::cmp::Ordering {
    let key_order = match sort.key.as_str() {
        "numberOfCompleted" => a.number_of_completed.cmp(&b.number_of_completed),
        "dateJoined" => a.date_joined.cmp(&b.date_joined),
        "username" => a.username.cmp(&b.username),
        _ => a.total_points.cmp(&b.total_points),
    };
    sort.direction.apply(key_order).then(a.user_id.cmp(&b.user_id))
}

/// Replace the requester's page-envelope row for one listing
fn write_page_meta(ctx: &ReducerContext, listing: Listing, total: u64, page: PageRequest) {
    let stale: Vec<u64> = ctx.db.page_meta()
        .requester()
        .filter(&ctx.sender)
        .filter(|meta| meta.listing == listing)
        .map(|meta| meta.id)
        .collect();
    for id in stale {
        ctx.db.page_meta().id().delete(&id);
    }

    ctx.db.page_meta().insert(PageMeta {
        id: 0, // auto_inc
        requester: ctx.sender,
        listing,
        total,
        skip: page.skip,
        limit: page.limit,
        has_more_data: paging::has_more_data(total, page.skip, page.limit),
    });
}

/// Drop every materialized read row belonging to one client
fn clear_client_results(ctx: &ReducerContext, requester: Identity) {
    let catalog_rows: Vec<u64> = ctx.db.catalog_page()
        .requester()
        .filter(&requester)
        .map(|row| row.id)
        .collect();
    for id in catalog_rows {
        ctx.db.catalog_page().id().delete(&id);
    }

    let leaderboard_rows: Vec<u64> = ctx.db.leaderboard_page()
        .requester()
        .filter(&requester)
        .map(|row| row.id)
        .collect();
    for id in leaderboard_rows {
        ctx.db.leaderboard_page().id().delete(&id);
    }

    let meta_rows: Vec<u64> = ctx.db.page_meta()
        .requester()
        .filter(&requester)
        .map(|row| row.id)
        .collect();
    for id in meta_rows {
        ctx.db.page_meta().id().delete(&id);
    }

    ctx.db.user_lookup().requester().delete(&requester);
    ctx.db.practice_puzzle().requester().delete(&requester);
}

// ==================== TYPES ====================

/// One solve in a user's history, recorded from the user's perspective
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct CompletedResult {
    pub puzzle_id: u64,
    /// Solve time in seconds, as reported by the client
    pub time: u32,
    pub points: u32,
}

/// One solve on a puzzle, recorded from the puzzle's perspective and keyed
/// by the solver's email
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct PlayerResult {
    pub email: String,
    pub time: u32,
    pub points: u32,
}

/// Which listing a page_meta row describes
#[derive(SpacetimeType, Clone, Copy, Debug, PartialEq)]
pub enum Listing {
    Ranked,
    Leaderboard,
}

// ==================== TABLES ====================

/// Session links an authenticated connection to a user
/// PRIVATE: created by the gateway after it verifies the bearer token
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Verified account email (always lowercase)
    pub email: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Authorized identities that can call gateway-only reducers
/// (session creation, registration, bulk restore)
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// User account with score-ledger aggregates
/// PRIVATE: holds the password hash; clients read user_profile instead
#[table(name = user)]
#[derive(Clone)]
pub struct User {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub username: String,

    /// Stored lowercase so lookups are case-insensitive
    #[unique]
    pub email: String,

    /// bcrypt hash produced by the gateway; never hashed or verified here
    pub password_hash: String,

    pub date_joined: Timestamp,

    /// Append-only solve history
    pub completed_puzzles: Vec<CompletedResult>,

    /// Running count of completed_puzzles, kept in lockstep by submit_result
    pub number_of_completed: u32,

    /// Running sum of points across the history
    pub total_points: u64,
}

/// Public projection of a user: everything a leaderboard row or profile
/// page needs, minus the password hash. Maintained on registration and on
/// every score submission.
#[table(name = user_profile, public)]
#[derive(Clone)]
pub struct UserProfile {
    #[primary_key]
    pub user_id: u64,

    #[unique]
    pub username: String,

    #[unique]
    pub email: String,

    pub date_joined: Timestamp,

    pub completed_puzzles: Vec<CompletedResult>,

    pub number_of_completed: u32,

    pub total_points: u64,
}

/// A ranked puzzle: persisted and open for competitive play
/// PUBLIC: the play view serves grid and solution together; anti-cheat is
/// out of scope
#[table(name = puzzle, public)]
#[derive(Clone)]
pub struct Puzzle {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub date_created: Timestamp,

    /// 81 cells, values 1-9 after the zero remap, None = blank
    pub grid: Vec<Option<u8>>,

    /// Same shape as grid, fully filled
    pub solution: Vec<Option<u8>>,

    pub name: String,

    /// Optional star rating; generated puzzles get the default
    #[default(Some(3u8))]
    pub difficulty: Option<u8>,

    /// Solves recorded against this puzzle, append-only
    pub player_results: Vec<PlayerResult>,

    /// Emails of users who currently like this puzzle
    pub likes: Vec<String>,

    /// Toggle-event counter: bumped on like AND unlike, so it is an
    /// engagement stat, not likes.len()
    #[default(0u32)]
    pub number_of_likes: u32,
}

/// Singleton counter behind the generation throttle
#[table(name = generation_counter)]
pub struct GenerationCounter {
    #[primary_key]
    pub id: u8,

    /// Submissions seen since the last automatic generation
    pub submissions_since_generation: u32,
}

/// A practice puzzle dealt to one client, never part of the ranked catalog.
/// One row per requester, replaced on each deal.
#[table(name = practice_puzzle, public)]
pub struct PracticePuzzle {
    #[primary_key]
    pub requester: Identity,

    pub grid: Vec<Option<u8>>,

    pub solution: Vec<Option<u8>>,

    pub dealt_at: Timestamp,
}

/// One catalog row of a client's current ranked listing
/// Summary projection only: play state comes from the puzzle table
#[table(name = catalog_page, public)]
pub struct CatalogPage {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub requester: Identity,

    /// 1-based position within the full sorted listing
    pub position: u64,

    pub puzzle_id: u64,

    pub date_created: Timestamp,

    pub name: String,

    pub difficulty: Option<u8>,

    pub player_results: Vec<PlayerResult>,

    pub likes: Vec<String>,

    pub number_of_likes: u32,
}

/// One leaderboard row of a client's current listing
#[table(name = leaderboard_page, public)]
pub struct LeaderboardPage {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub requester: Identity,

    /// 1-based position within the full sorted listing
    pub position: u64,

    pub username: String,

    pub email: String,

    pub date_joined: Timestamp,

    pub number_of_completed: u32,

    pub total_points: u64,
}

/// Page envelope for a client's current listing: {total, skip, limit,
/// hasMoreData}, one row per listing kind
#[table(name = page_meta, public)]
pub struct PageMeta {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub requester: Identity,

    pub listing: Listing,

    /// Count of ALL items in the listing, independent of pagination
    pub total: u64,

    pub skip: u64,

    pub limit: u64,

    pub has_more_data: bool,
}

/// Result row for a client's user lookup. Absent row = lookup missed,
/// which the gateway passes through as a null body, not an error.
#[table(name = user_lookup, public)]
pub struct UserLookup {
    #[primary_key]
    pub requester: Identity,

    pub username: String,

    pub email: String,

    pub date_joined: Timestamp,

    pub number_of_completed: u32,

    pub total_points: u64,
}

// ==================== VIEWS ====================

/// View: the sender's own public profile
/// Clients use: SELECT * FROM my_profile
#[view(name = my_profile, public)]
fn my_profile(ctx: &spacetimedb::ViewContext) -> Option<UserProfile> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.user_profile().email().find(&session.email)
}

// ==================== ROW LEVEL SECURITY ====================

// Materialized read results are per-requester: every client sees only the
// rows produced for its own browse/lookup/deal calls.

#[client_visibility_filter]
const CATALOG_PAGE_VISIBILITY: Filter = Filter::Sql(
    "SELECT * FROM catalog_page WHERE requester = :sender"
);

#[client_visibility_filter]
const LEADERBOARD_PAGE_VISIBILITY: Filter = Filter::Sql(
    "SELECT * FROM leaderboard_page WHERE requester = :sender"
);

#[client_visibility_filter]
const PAGE_META_VISIBILITY: Filter = Filter::Sql(
    "SELECT * FROM page_meta WHERE requester = :sender"
);

#[client_visibility_filter]
const USER_LOOKUP_VISIBILITY: Filter = Filter::Sql(
    "SELECT * FROM user_lookup WHERE requester = :sender"
);

#[client_visibility_filter]
const PRACTICE_PUZZLE_VISIBILITY: Filter = Filter::Sql(
    "SELECT * FROM practice_puzzle WHERE requester = :sender"
);

// ==================== REDUCERS ====================

/// Create a verified session for a client identity.
/// Called by the gateway AFTER it verifies the bearer token; the module
/// never sees credentials or tokens itself.
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, email: String) -> Result<(), String> {
    require_worker(ctx)?;

    let identity = Identity::from_hex(&client_identity)
        .map_err(|_| "invalid: client identity is not a hex identity".to_string())?;
    let email = email.trim().to_lowercase();

    if ctx.db.user().email().find(&email).is_none() {
        return Err(format!("not found: no user for {}", email));
    }

    // Delete stale sessions: same user (unclean reconnect) OR same
    // connection (prevents a primary key conflict)
    let stale: Vec<Identity> = ctx.db.session()
        .iter()
        .filter(|s| s.email == email || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for connection_id in stale {
        ctx.db.session().connection_id().delete(&connection_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        email: email.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created user:{} ws:{}", email, &client_identity[..8.min(client_identity.len())]);
    Ok(())
}

/// Register a new account. The gateway hashes the password before calling.
/// Duplicate username or email is a conflict and leaves the existing record
/// untouched.
#[reducer]
pub fn register_user(ctx: &ReducerContext, username: String, email: String, password_hash: String) -> Result<(), String> {
    require_worker(ctx)?;

    let username = username.trim().to_string();
    let email = email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() || password_hash.is_empty() {
        return Err("invalid: username, email and password hash are required".to_string());
    }

    check_registration_conflict(
        ctx.db.user().username().find(&username),
        ctx.db.user().email().find(&email),
    )?;

    let row = ctx.db.user().insert(User {
        id: 0, // auto_inc
        username,
        email,
        password_hash,
        date_joined: ctx.timestamp,
        completed_puzzles: Vec::new(),
        number_of_completed: 0,
        total_points: 0,
    });
    upsert_profile(ctx, profile_of(&row));

    log::info!("[REGISTER] user:{} username:{}", row.id, row.username);
    Ok(())
}

/// Replace a user's password hash. Old-password verification happens in the
/// gateway before it calls this.
#[reducer]
pub fn set_password(ctx: &ReducerContext, email: String, password_hash: String) -> Result<(), String> {
    require_worker(ctx)?;

    let email = email.trim().to_lowercase();
    if password_hash.is_empty() {
        return Err("invalid: password hash is required".to_string());
    }

    let mut user = ctx.db.user()
        .email()
        .find(&email)
        .ok_or_else(|| format!("not found: no user for {}", email))?;
    user.password_hash = password_hash;
    ctx.db.user().id().update(user);

    log::info!("[AUTH] password changed user:{}", email);
    Ok(())
}

/// Clean up when a client drops: its session and materialized read rows
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    ctx.db.session().connection_id().delete(&ctx.sender);
    clear_client_results(ctx, ctx.sender);
}

/// Mint a new ranked puzzle (POST /ranked). Open endpoint; names are not
/// unique.
#[reducer]
pub fn create_ranked(ctx: &ReducerContext, name: Option<String>) {
    mint_ranked_puzzle(ctx, name);
}

/// Deal a fresh practice puzzle to the caller (GET /random).
/// Not persisted into the ranked catalog; replaces the caller's previous
/// practice row.
#[reducer]
pub fn deal_practice_puzzle(ctx: &ReducerContext) {
    let raw = generate::generate(&mut ctx.rng());
    let row = PracticePuzzle {
        requester: ctx.sender,
        grid: generate::remap_zeroes(&raw.grid),
        solution: generate::remap_zeroes(&raw.solution),
        dealt_at: ctx.timestamp,
    };
    if ctx.db.practice_puzzle().requester().find(&ctx.sender).is_some() {
        ctx.db.practice_puzzle().requester().update(row);
    } else {
        ctx.db.practice_puzzle().insert(row);
    }
    log::info!("[PRACTICE] dealt puzzle to {}", ctx.sender);
}

/// Submit a completed ranked game (PATCH /users/results/:email).
///
/// One transaction covers the whole submission: the caller's session must
/// resolve to the target email (mismatch rejects with no side effects), then
/// the user's ledger and the puzzle's result list are updated together, and
/// the generation throttle ticks - possibly minting a new ranked puzzle.
#[reducer]
pub fn submit_result(ctx: &ReducerContext, email: String, puzzle_id: u64, time: u32, points: u32) -> Result<(), String> {
    let mut user = session_user(ctx)?;
    if !user.email.eq_ignore_ascii_case(email.trim()) {
        log::warn!("[SUBMIT] identity mismatch session:{} target:{}", user.email, email);
        return Err("unauthorized: token identity does not match target user".to_string());
    }

    // Ledger update: history, totals, completion count
    record_completion(&mut user, puzzle_id, time, points);
    let profile = profile_of(&user);
    let user_email = user.email.clone();
    ctx.db.user().id().update(user);
    upsert_profile(ctx, profile);

    // Catalog update: mirror the solve onto the puzzle
    let mut puzzle = ctx.db.puzzle()
        .id()
        .find(&puzzle_id)
        .ok_or_else(|| format!("not found: puzzle {}", puzzle_id))?;
    append_player_result(&mut puzzle, &user_email, time, points);
    ctx.db.puzzle().id().update(puzzle);

    log::info!("[SUBMIT] user:{} puzzle:{} time:{} points:{}", user_email, puzzle_id, time, points);

    // Throttle: every few submissions the catalog grows by one
    if throttle_tick(ctx) {
        let new_id = mint_ranked_puzzle(ctx, None);
        log::info!("[THROTTLE] fired, generated puzzle:{}", new_id);
    }

    Ok(())
}

/// Toggle the caller's like on a ranked puzzle (POST /ranked/:id/likes).
/// The session identity must match user_email. A missing puzzle surfaces as
/// an error, never a silent success.
#[reducer]
pub fn toggle_like(ctx: &ReducerContext, puzzle_id: u64, user_email: String) -> Result<(), String> {
    let user = session_user(ctx)?;
    if !user.email.eq_ignore_ascii_case(user_email.trim()) {
        log::warn!("[LIKE] identity mismatch session:{} target:{}", user.email, user_email);
        return Err("unauthorized: token identity does not match target user".to_string());
    }

    let mut puzzle = ctx.db.puzzle()
        .id()
        .find(&puzzle_id)
        .ok_or_else(|| format!("not found: puzzle {}", puzzle_id))?;
    let now_liked = toggle_like_membership(&mut puzzle, &user.email);
    ctx.db.puzzle().id().update(puzzle);

    log::info!("[LIKE] puzzle:{} user:{} liked:{}", puzzle_id, user.email, now_liked);
    Ok(())
}

/// Materialize one page of the ranked catalog for the caller (GET /ranked).
/// Protected: requires a verified session.
#[reducer]
pub fn browse_ranked(ctx: &ReducerContext, sort: Option<String>, limit: Option<u64>, skip: Option<u64>) -> Result<(), String> {
    session_user(ctx)?;

    let page = paging::page_request(limit, skip);
    let sort = paging::parse_sort(sort.as_deref(), CATALOG_DEFAULT_SORT);

    let mut puzzles: Vec<Puzzle> = ctx.db.puzzle().iter().collect();
    let total = puzzles.len() as u64;
    puzzles.sort_by(|a, b| compare_catalog(a, b, &sort));

    let stale: Vec<u64> = ctx.db.catalog_page()
        .requester()
        .filter(&ctx.sender)
        .map(|row| row.id)
        .collect();
    for id in stale {
        ctx.db.catalog_page().id().delete(&id);
    }

    for (offset, puzzle) in puzzles
        .into_iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .enumerate()
    {
        ctx.db.catalog_page().insert(CatalogPage {
            id: 0, // auto_inc
            requester: ctx.sender,
            position: page_position(page.skip, offset),
            puzzle_id: puzzle.id,
            date_created: puzzle.date_created,
            name: puzzle.name,
            difficulty: puzzle.difficulty,
            player_results: puzzle.player_results,
            likes: puzzle.likes,
            number_of_likes: puzzle.number_of_likes,
        });
    }

    write_page_meta(ctx, Listing::Ranked, total, page);
    Ok(())
}

/// Materialize one page of the leaderboard for the caller (GET /users).
/// Open to any connected client.
#[reducer]
pub fn browse_leaderboard(ctx: &ReducerContext, sort: Option<String>, limit: Option<u64>, skip: Option<u64>) {
    let page = paging::page_request(limit, skip);
    let sort = paging::parse_sort(sort.as_deref(), LEADERBOARD_DEFAULT_SORT);

    let mut profiles: Vec<UserProfile> = ctx.db.user_profile().iter().collect();
    let total = profiles.len() as u64;
    profiles.sort_by(|a, b| compare_leaderboard(a, b, &sort));

    let stale: Vec<u64> = ctx.db.leaderboard_page()
        .requester()
        .filter(&ctx.sender)
        .map(|row| row.id)
        .collect();
    for id in stale {
        ctx.db.leaderboard_page().id().delete(&id);
    }

    for (offset, profile) in profiles
        .into_iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .enumerate()
    {
        ctx.db.leaderboard_page().insert(LeaderboardPage {
            id: 0, // auto_inc
            requester: ctx.sender,
            position: page_position(page.skip, offset),
            username: profile.username,
            email: profile.email,
            date_joined: profile.date_joined,
            number_of_completed: profile.number_of_completed,
            total_points: profile.total_points,
        });
    }

    write_page_meta(ctx, Listing::Leaderboard, total, page);
}

/// Look up one user's summary (GET /users/:username).
/// Tries the handle as a username first, then falls back to a
/// case-insensitive email match. A miss leaves no row, which the gateway
/// passes through as a null body.
#[reducer]
pub fn lookup_user(ctx: &ReducerContext, handle: String) {
    let handle = handle.trim();
    let hit = ctx.db.user_profile()
        .username()
        .find(&handle.to_string())
        .or_else(|| ctx.db.user_profile().email().find(&handle.to_lowercase()));

    match hit {
        Some(profile) => {
            let row = UserLookup {
                requester: ctx.sender,
                username: profile.username,
                email: profile.email,
                date_joined: profile.date_joined,
                number_of_completed: profile.number_of_completed,
                total_points: profile.total_points,
            };
            if ctx.db.user_lookup().requester().find(&ctx.sender).is_some() {
                ctx.db.user_lookup().requester().update(row);
            } else {
                ctx.db.user_lookup().insert(row);
            }
        }
        None => {
            // Miss: clear any previous hit so the client sees null
            ctx.db.user_lookup().requester().delete(&ctx.sender);
            log::debug!("[LOOKUP] no user for handle {}", handle);
        }
    }
}

#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // The module owner doubles as the first authorized gateway worker
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    // Seed the generation counter singleton (idempotent on hot-reload)
    if ctx.db.generation_counter().id().find(&0).is_none() {
        ctx.db.generation_counter().insert(GenerationCounter {
            id: 0,
            submissions_since_generation: 0,
        });
    }

    log::info!("Sudoku Race module initialized successfully");
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(email: &str) -> User {
        User {
            id: 1,
            username: "player-one".to_string(),
            email: email.to_string(),
            password_hash: "$2b$08$hash".to_string(),
            date_joined: Timestamp::from_micros_since_unix_epoch(0),
            completed_puzzles: Vec::new(),
            number_of_completed: 0,
            total_points: 0,
        }
    }

    fn test_puzzle() -> Puzzle {
        Puzzle {
            id: 7,
            date_created: Timestamp::from_micros_since_unix_epoch(0),
            grid: vec![None; generate::CELL_COUNT],
            solution: vec![Some(9); generate::CELL_COUNT],
            name: "test puzzle".to_string(),
            difficulty: Some(DEFAULT_DIFFICULTY),
            player_results: Vec::new(),
            likes: Vec::new(),
            number_of_likes: 0,
        }
    }

    #[test]
    fn completion_updates_history_and_aggregates() {
        let mut user = test_user("u@example.com");
        record_completion(&mut user, 7, 42, 10);

        assert_eq!(user.total_points, 10);
        assert_eq!(user.number_of_completed, 1);
        assert_eq!(
            user.completed_puzzles,
            vec![CompletedResult { puzzle_id: 7, time: 42, points: 10 }]
        );
        assert_eq!(user.number_of_completed as usize, user.completed_puzzles.len());
    }

    #[test]
    fn completion_is_at_least_once_by_design() {
        // No dedup key: submitting the same puzzle twice double-counts
        let mut user = test_user("u@example.com");
        record_completion(&mut user, 7, 42, 10);
        record_completion(&mut user, 7, 40, 10);

        assert_eq!(user.total_points, 20);
        assert_eq!(user.number_of_completed, 2);
        assert_eq!(user.completed_puzzles.len(), 2);
    }

    #[test]
    fn player_result_mirrors_submission() {
        let mut puzzle = test_puzzle();
        append_player_result(&mut puzzle, "u@example.com", 42, 10);

        assert_eq!(
            puzzle.player_results,
            vec![PlayerResult {
                email: "u@example.com".to_string(),
                time: 42,
                points: 10,
            }]
        );
    }

    #[test]
    fn double_toggle_restores_membership_but_counts_both_events() {
        let mut puzzle = test_puzzle();

        assert!(toggle_like_membership(&mut puzzle, "u@example.com"));
        assert_eq!(puzzle.likes, vec!["u@example.com".to_string()]);
        assert_eq!(puzzle.number_of_likes, 1);

        assert!(!toggle_like_membership(&mut puzzle, "u@example.com"));
        assert!(puzzle.likes.is_empty());
        // Engagement counter moves on unlike too
        assert_eq!(puzzle.number_of_likes, 2);
    }

    #[test]
    fn toggle_only_removes_the_toggling_user() {
        let mut puzzle = test_puzzle();
        toggle_like_membership(&mut puzzle, "a@example.com");
        toggle_like_membership(&mut puzzle, "b@example.com");
        toggle_like_membership(&mut puzzle, "a@example.com");

        assert_eq!(puzzle.likes, vec!["b@example.com".to_string()]);
        assert_eq!(puzzle.number_of_likes, 3);
    }

    #[test]
    fn throttle_fires_every_fourth_submission() {
        let mut counter = 0u32;
        let fired: Vec<bool> = (0..8)
            .map(|_| advance_generation_counter(&mut counter))
            .collect();

        assert_eq!(
            fired,
            vec![false, false, false, true, false, false, false, true]
        );
        assert_eq!(counter, 0);
    }

    #[test]
    fn profile_carries_aggregates_but_never_the_hash() {
        let mut user = test_user("u@example.com");
        record_completion(&mut user, 7, 42, 10);
        let profile = profile_of(&user);

        assert_eq!(profile.user_id, user.id);
        assert_eq!(profile.username, user.username);
        assert_eq!(profile.email, user.email);
        assert_eq!(profile.total_points, 10);
        assert_eq!(profile.number_of_completed, 1);
        assert_eq!(profile.completed_puzzles, user.completed_puzzles);
    }

    #[test]
    fn leaderboard_default_sort_is_points_descending() {
        let sort = paging::parse_sort(None, LEADERBOARD_DEFAULT_SORT);

        let mut a = profile_of(&test_user("a@example.com"));
        a.user_id = 1;
        a.total_points = 30;
        let mut b = profile_of(&test_user("b@example.com"));
        b.user_id = 2;
        b.total_points = 50;

        // Descending points: b (50) sorts before a (30)
        assert_eq!(compare_leaderboard(&a, &b, &sort), std::cmp::Ordering::Greater);
        assert_eq!(compare_leaderboard(&b, &a, &sort), std::cmp::Ordering::Less);
    }

    #[test]
    fn comparators_break_ties_by_id_for_stable_pages() {
        let sort = paging::parse_sort(None, LEADERBOARD_DEFAULT_SORT);

        let mut a = profile_of(&test_user("a@example.com"));
        a.user_id = 1;
        let mut b = profile_of(&test_user("b@example.com"));
        b.user_id = 2;

        assert_eq!(compare_leaderboard(&a, &b, &sort), std::cmp::Ordering::Less);
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let existing = test_user("u@example.com");

        // Reused email (usernames differ)
        let err = check_registration_conflict(None, Some(existing.clone())).unwrap_err();
        assert_eq!(err, "conflict: username or email is taken");

        // Reused username (emails differ)
        assert!(check_registration_conflict(Some(existing.clone()), None).is_err());

        // Both taken by the same existing account
        assert!(check_registration_conflict(Some(existing.clone()), Some(existing)).is_err());

        // Fresh username and email register cleanly
        assert!(check_registration_conflict(None, None).is_ok());
    }

    #[test]
    fn page_positions_survive_large_skips() {
        // First entry of the first page
        assert_eq!(page_position(0, 0), 1);
        // Continues 1-based across pages
        assert_eq!(page_position(10, 0), 11);
        assert_eq!(page_position(10, 9), 20);
        // No truncation for skips beyond u32 range
        assert_eq!(page_position(u32::MAX as u64 + 5, 2), u32::MAX as u64 + 8);
    }

    #[test]
    fn catalog_sorts_by_likes_when_asked() {
        let sort = paging::parse_sort(Some("-numberOfLikes"), CATALOG_DEFAULT_SORT);

        let mut quiet = test_puzzle();
        quiet.id = 1;
        let mut popular = test_puzzle();
        popular.id = 2;
        popular.number_of_likes = 12;

        assert_eq!(compare_catalog(&popular, &quiet, &sort), std::cmp::Ordering::Less);
    }
}
