use serde::{Deserialize, Serialize};

pub const COURT_WIDTH: f32 = 800.0;
pub const COURT_HEIGHT: f32 = 550.0;
pub const PADDLE_WIDTH: f32 = 20.0;
pub const PADDLE_HEIGHT: f32 = 90.0;
pub const PADDLE_MARGIN: f32 = 10.0;
pub const PADDLE_SPEED: f32 = 8.0;
pub const BALL_RADIUS: f32 = 7.0;
pub const BALL_BASE_SPEED: f32 = 5.0;
pub const RALLY_SPEED_BASE: f32 = 4.0;
pub const RALLY_SPEED_STEP: f32 = 0.3;
pub const WIN_SCORE: u32 = 3;
pub const DEFAULT_TICK_RATE: f32 = 50.0;
pub const DEFAULT_RATING: i32 = 1000;
pub const MATCH_THRESHOLD: f32 = 18.0;
pub const MATCH_WAIT_CEILING_SECS: f32 = 30.0;
pub const MATCHMAKING_SWEEP_SECS: u64 = 2;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len < f32::EPSILON {
            return *self;
        }
        Vec2 {
            x: self.x / len,
            y: self.y / len,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dir: Vec2,
    pub speed: f32,
    pub touched: bool,
    pub rally: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paddle {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub name: String,
    pub rating: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GameState {
    pub ball: Ball,
    pub left_paddle: Paddle,
    pub right_paddle: Paddle,
    pub left_score: u32,
    pub right_score: u32,
    pub left_player: PlayerSnapshot,
    pub right_player: PlayerSnapshot,
}

impl GameState {
    pub fn new(left_player: PlayerSnapshot, right_player: PlayerSnapshot) -> Self {
        Self {
            ball: Ball {
                x: COURT_WIDTH / 2.0 - BALL_RADIUS / 2.0,
                y: COURT_HEIGHT / 2.0 - BALL_RADIUS / 2.0,
                dir: Vec2::new(random_sign(), random_sign()),
                speed: BALL_BASE_SPEED,
                touched: false,
                rally: 0,
            },
            left_paddle: Paddle {
                x: PADDLE_MARGIN,
                y: (COURT_HEIGHT - PADDLE_HEIGHT) / 2.0,
            },
            right_paddle: Paddle {
                x: COURT_WIDTH - PADDLE_WIDTH - PADDLE_MARGIN,
                y: (COURT_HEIGHT - PADDLE_HEIGHT) / 2.0,
            },
            left_score: 0,
            right_score: 0,
            left_player,
            right_player,
        }
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        match side {
            Side::Left => &self.left_paddle,
            Side::Right => &self.right_paddle,
        }
    }

    pub fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        match side {
            Side::Left => &mut self.left_paddle,
            Side::Right => &mut self.right_paddle,
        }
    }

    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left_score,
            Side::Right => self.right_score,
        }
    }

    pub fn add_point(&mut self, side: Side) -> u32 {
        match side {
            Side::Left => {
                self.left_score += 1;
                self.left_score
            }
            Side::Right => {
                self.right_score += 1;
                self.right_score
            }
        }
    }

    pub fn player(&self, side: Side) -> &PlayerSnapshot {
        match side {
            Side::Left => &self.left_player,
            Side::Right => &self.right_player,
        }
    }

    // The serve always travels toward the side that conceded the goal; the
    // vertical component stays frozen until a paddle touches the ball.
    pub fn reset_ball(&mut self, toward: Side) {
        self.ball.x = COURT_WIDTH / 2.0 - BALL_RADIUS / 2.0;
        self.ball.y = COURT_HEIGHT / 2.0 - BALL_RADIUS / 2.0;
        self.ball.dir = Vec2::new(
            match toward {
                Side::Right => 1.0,
                Side::Left => -1.0,
            },
            random_sign(),
        );
        self.ball.speed = BALL_BASE_SPEED;
        self.ball.touched = false;
        self.ball.rally = 0;
    }
}

fn random_sign() -> f32 {
    if rand::random() {
        1.0
    } else {
        -1.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Login { name: String },
    FindMatch,
    CancelMatchmaking,
    PlayerInput { input: i32 },
    JoinTournament,
    LeaveTournament,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TournamentSeat {
    pub id: u32,
    pub name: String,
    pub rating: i32,
    pub seat: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RankingEntry {
    pub place: u32,
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Waiting {
        queue_position: usize,
        message: String,
    },
    MatchmakingUpdate {
        queue_position: usize,
        message: String,
    },
    MatchmakingCancelled {
        message: String,
    },
    Error {
        message: String,
    },
    MatchCreated {
        match_id: String,
        side: Side,
        opponent: String,
        game_state: GameState,
    },
    GameState {
        match_id: String,
        state: GameState,
    },
    GameOver {
        match_id: String,
        winner: String,
        message: String,
        left_score: u32,
        right_score: u32,
    },
    MatchResult {
        match_id: String,
        winner: u32,
        winner_display: String,
        message: String,
    },
    TournamentState {
        tournament_id: u32,
        player_count: usize,
        players: Vec<TournamentSeat>,
        waiting: bool,
        message: String,
        your_seat: Option<u32>,
    },
    TournamentLeft {
        message: String,
    },
    ThirdPlaceStarting {
        player1: String,
        player2: String,
        message: String,
    },
    FinalsStarting {
        player1: String,
        player2: String,
        message: String,
    },
    TournamentRankings {
        tournament_id: u32,
        rankings: Vec<RankingEntry>,
        complete: bool,
    },
    TournamentCancelled {
        forfeiter: u32,
        forfeiter_display: String,
        cancelled_match_ids: Vec<String>,
        message: String,
    },
}
