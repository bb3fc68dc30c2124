//! Deterministic fixed-tick simulation of a single Pong court

use shared::{
    GameState, Side, Vec2, BALL_RADIUS, COURT_HEIGHT, COURT_WIDTH, PADDLE_HEIGHT, PADDLE_SPEED,
    PADDLE_WIDTH, RALLY_SPEED_BASE, RALLY_SPEED_STEP, WIN_SCORE,
};

///Outcome of a goal check: who scored, and whether that point ended the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalEvent {
    pub scorer: Side,
    pub winner: Option<Side>,
}

///Advances the court by one tick: paddle movement, ball flight, wall
///bounces and paddle deflections. Goal detection is a separate pass.
pub fn step(state: &mut GameState, left_input: i32, right_input: i32) {
    move_paddle(state, Side::Left, left_input);
    move_paddle(state, Side::Right, right_input);

    // Horizontal flight is unconditional; vertical flight only starts
    // once a paddle has touched the ball.
    state.ball.x += state.ball.dir.x * state.ball.speed;
    if state.ball.touched {
        state.ball.y += state.ball.dir.y * state.ball.speed;
    }

    if state.ball.y <= 0.0 || state.ball.y >= COURT_HEIGHT - BALL_RADIUS {
        state.ball.dir.y = -state.ball.dir.y;
    }

    if overlaps_paddle(state, Side::Left) {
        deflect(state, Side::Left);
    }
    if overlaps_paddle(state, Side::Right) {
        deflect(state, Side::Right);
    }
}

///Detects a goal, resets the ball for the next serve and updates the score.
///Returns None while the ball is still in play.
pub fn check_goal(state: &mut GameState) -> Option<GoalEvent> {
    let scorer = if state.ball.x <= 0.0 {
        Side::Right
    } else if state.ball.x >= COURT_WIDTH {
        Side::Left
    } else {
        return None;
    };

    state.reset_ball(scorer.opponent());
    let score = state.add_point(scorer);
    let winner = (score >= WIN_SCORE).then_some(scorer);

    Some(GoalEvent { scorer, winner })
}

fn move_paddle(state: &mut GameState, side: Side, input: i32) {
    let paddle = state.paddle_mut(side);
    paddle.y = (paddle.y + input as f32 * PADDLE_SPEED).clamp(0.0, COURT_HEIGHT - PADDLE_HEIGHT);
}

fn overlaps_paddle(state: &GameState, side: Side) -> bool {
    let ball = &state.ball;
    let paddle = state.paddle(side);

    let within_x = match side {
        Side::Left => ball.x <= paddle.x + PADDLE_WIDTH && ball.x >= paddle.x,
        Side::Right => ball.x + BALL_RADIUS >= paddle.x && ball.x <= paddle.x + PADDLE_WIDTH,
    };

    within_x && ball.y + BALL_RADIUS >= paddle.y && ball.y <= paddle.y + PADDLE_HEIGHT
}

///Redirects the ball off a paddle. The deflection angle scales with how far
///from the paddle center the ball struck, up to 60 degrees at the edges.
fn deflect(state: &mut GameState, side: Side) {
    let (paddle_x, paddle_y) = {
        let paddle = state.paddle(side);
        (paddle.x, paddle.y)
    };

    let impact = (state.ball.y + BALL_RADIUS / 2.0) - (paddle_y + PADDLE_HEIGHT / 2.0);
    let normalized = impact / (PADDLE_HEIGHT / 2.0);
    let angle = normalized * std::f32::consts::FRAC_PI_3;

    let dir_x = match side {
        Side::Left => angle.cos(),
        Side::Right => -angle.cos(),
    };
    state.ball.dir = Vec2::new(dir_x, angle.sin()).normalized();

    state.ball.rally += 1;
    state.ball.speed = RALLY_SPEED_BASE + state.ball.rally as f32 * RALLY_SPEED_STEP;

    // Push the ball clear of the paddle so it cannot deflect twice
    state.ball.x = match side {
        Side::Left => paddle_x + PADDLE_WIDTH + 1.0,
        Side::Right => paddle_x - BALL_RADIUS - 1.0,
    };
    state.ball.touched = true;
}
