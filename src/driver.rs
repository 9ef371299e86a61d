use crate::{
    error::DriverError,
    process::{LineProcess, MatchProcesses, ProcessHandle, ReadResult},
    tournament::{Competitor, MatchJob, MatchOutcome, Side, Verdict},
};
use chrono::Utc;
use log::{error, info, warn};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    path::Path,
};

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArbiterStatus {
    InPlay,
    RedWins,
    BlackWins,
    Draw,
    Unknown(String),
}

impl ArbiterStatus {
    pub fn parse(s: &str) -> ArbiterStatus {
        match s.trim() {
            "IN-PLAY" => ArbiterStatus::InPlay,
            "RED WINS" => ArbiterStatus::RedWins,
            "BLACK WINS" => ArbiterStatus::BlackWins,
            "DRAW" => ArbiterStatus::Draw,
            other => ArbiterStatus::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug)]
enum State {
    AwaitArbiterSignal,
    AwaitStatus,
    InPlay { board: String },
    Finished(Verdict),
}

pub struct MatchDriver<'a, P: LineProcess> {
    job: &'a MatchJob,
    procs: MatchProcesses<P>,
    ply: u32,
}

impl<'a, P: LineProcess> MatchDriver<'a, P> {
    pub fn new(job: &'a MatchJob, procs: MatchProcesses<P>) -> MatchDriver<'a, P> {
        MatchDriver { job, procs, ply: 1 }
    }

    /// Plays the match to the end. The processes are terminated when the
    /// driver is dropped on the way out.
    pub fn run(mut self) -> MatchOutcome {
        let started = Utc::now();
        let verdict = match self.drive() {
            Ok(verdict) => verdict,
            Err(err) => {
                error!("Game #{}: {err}", self.job.id);
                Verdict::error(err.to_string())
            }
        };
        MatchOutcome::new(self.job.id, started, self.ply - 1, verdict)
    }

    fn drive(&mut self) -> Result<Verdict, DriverError> {
        self.procs.arbiter.write_line("START 0")?;

        let mut state = State::AwaitArbiterSignal;
        loop {
            state = match state {
                State::AwaitArbiterSignal => self.await_signal()?,
                State::AwaitStatus => self.read_status()?,
                State::InPlay { board } => self.play_ply(&board)?,
                State::Finished(verdict) => return Ok(verdict),
            };
        }
    }

    fn await_signal(&mut self) -> Result<State, DriverError> {
        let Some(signal) = self.read_arbiter()? else {
            return Ok(State::Finished(Verdict::error("arbiter closed its output")));
        };
        if signal.starts_with("ERR") {
            warn!("Game #{}: arbiter reported {signal}", self.job.id);
            return Ok(State::Finished(Verdict::error(signal)));
        }
        self.procs.arbiter.write_line("STATE")?;
        Ok(State::AwaitStatus)
    }

    fn read_status(&mut self) -> Result<State, DriverError> {
        let Some(status) = self.read_arbiter()? else {
            return Ok(State::Finished(Verdict::error("arbiter closed its output")));
        };

        let state = match ArbiterStatus::parse(&status) {
            ArbiterStatus::InPlay => {
                let board = self.expect_arbiter()?;
                let _ack = self.expect_arbiter()?;
                State::InPlay { board }
            }
            ArbiterStatus::RedWins => State::Finished(self.side_won(Side::Red)?),
            ArbiterStatus::BlackWins => State::Finished(self.side_won(Side::Black)?),
            ArbiterStatus::Draw => {
                let reason = self.read_result_reason()?;
                State::Finished(Verdict::draw(reason))
            }
            ArbiterStatus::Unknown(text) => {
                State::Finished(Verdict::error(format!("unrecognized status '{text}'")))
            }
        };
        Ok(state)
    }

    fn side_won(&mut self, side: Side) -> Result<Verdict, DriverError> {
        let reason = self.read_result_reason()?;
        Ok(Verdict::win(self.job.competitor_on(side), side, reason))
    }

    fn play_ply(&mut self, board: &str) -> Result<State, DriverError> {
        let side = Side::to_move(self.ply);
        let mover = self.job.competitor_on(side);
        let read_timeout = self.job.read_timeout;
        let ply = self.ply;
        let process = self.competitor(mover);

        if !process.is_alive() {
            warn!("{} ({mover}) crashed before ply {ply}", process.name());
            return Ok(State::Finished(Verdict::forfeit(mover, side, "crashed")));
        }

        match process.write_line(board) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                warn!("{} ({mover}) crashed before ply {ply}", process.name());
                return Ok(State::Finished(Verdict::forfeit(mover, side, "crashed")));
            }
            Err(err) => return Err(err.into()),
        }

        let mv = match process.read_line(read_timeout)? {
            ReadResult::Line(mv) => mv,
            ReadResult::Disconnected => {
                warn!("{} ({mover}) did not respond at ply {ply}", process.name());
                return Ok(State::Finished(Verdict::forfeit(mover, side, "did not respond")));
            }
            ReadResult::Timeout => {
                warn!("{} ({mover}) timed out at ply {ply}", process.name());
                return Ok(State::Finished(Verdict::forfeit(mover, side, "timed out")));
            }
        };

        self.procs.arbiter.write_line(&mv)?;
        self.ply += 1;
        Ok(State::AwaitArbiterSignal)
    }

    fn competitor(&mut self, competitor: Competitor) -> &mut P {
        match competitor {
            Competitor::A => &mut self.procs.a,
            Competitor::B => &mut self.procs.b,
        }
    }

    fn read_arbiter(&mut self) -> Result<Option<String>, DriverError> {
        match self.procs.arbiter.read_line(self.job.read_timeout)? {
            ReadResult::Line(line) => Ok(Some(line)),
            ReadResult::Disconnected => Ok(None),
            ReadResult::Timeout => Err(DriverError::Protocol("arbiter timed out".to_string())),
        }
    }

    fn expect_arbiter(&mut self) -> Result<String, DriverError> {
        self.read_arbiter()?.ok_or_else(|| {
            DriverError::Protocol("arbiter closed its output mid-status".to_string())
        })
    }

    /// Board then reason. The result is already decided, so a short read
    /// only loses the reason text.
    fn read_result_reason(&mut self) -> Result<String, DriverError> {
        if self.read_arbiter()?.is_none() {
            return Ok(String::new());
        }
        Ok(self.read_arbiter()?.unwrap_or_default())
    }
}

fn spawn(job: &MatchJob, path: &Path, role: &str) -> Result<ProcessHandle, DriverError> {
    ProcessHandle::spawn(path)
        .map(|p| p.named(format!("#{} {role}", job.id)))
        .map_err(|source| DriverError::Spawn {
            path: path.display().to_string(),
            source,
        })
}

pub fn spawn_processes(job: &MatchJob) -> Result<MatchProcesses<ProcessHandle>, DriverError> {
    let arbiter = spawn(job, &job.arbiter, "arbiter")?;
    let a = spawn(job, job.competitor_path(Competitor::A), "A")?;
    let b = spawn(job, job.competitor_path(Competitor::B), "B")?;
    Ok(MatchProcesses::new(arbiter, a, b))
}

/// Runs one match between real child processes.
pub fn play_match(job: &MatchJob) -> MatchOutcome {
    play_match_with(job, spawn_processes)
}

/// Acquires the processes with `acquire` and plays the match. Spawn failures
/// and panics end up as error outcomes.
pub fn play_match_with<P, F>(job: &MatchJob, acquire: F) -> MatchOutcome
where
    P: LineProcess,
    F: FnOnce(&MatchJob) -> Result<MatchProcesses<P>, DriverError>,
{
    let started = Utc::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let procs = acquire(job)?;
        Ok::<_, DriverError>(MatchDriver::new(job, procs).run())
    }));

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            error!("Game #{}: {err}", job.id);
            MatchOutcome::new(job.id, started, 0, Verdict::error(err.to_string()))
        }
        Err(payload) => {
            let err = DriverError::Panic(panic_message(payload.as_ref()));
            error!("Game #{}: {err}", job.id);
            MatchOutcome::new(job.id, started, 0, Verdict::error(err.to_string()))
        }
    };

    info!(
        "Game #{} finished after {} plies in {}ms: {}",
        job.id,
        outcome.plies,
        (Utc::now() - outcome.started).num_milliseconds(),
        outcome.decision
    );
    if job.verbose {
        println!("{}", outcome.describe());
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::Decision;
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        path::PathBuf,
        rc::Rc,
        time::Duration,
    };

    #[derive(Default)]
    struct Probe {
        sent: RefCell<Vec<String>>,
        terminations: Cell<u32>,
    }

    struct ScriptedProcess {
        name: String,
        replies: VecDeque<ReadResult>,
        alive: bool,
        broken_pipe: bool,
        panic_on_read: bool,
        probe: Rc<Probe>,
    }

    impl ScriptedProcess {
        fn new(name: &str, replies: &[&str]) -> (ScriptedProcess, Rc<Probe>) {
            let probe = Rc::new(Probe::default());
            let p = ScriptedProcess {
                name: name.to_string(),
                replies: replies
                    .iter()
                    .map(|r| ReadResult::Line(r.to_string()))
                    .collect(),
                alive: true,
                broken_pipe: false,
                panic_on_read: false,
                probe: probe.clone(),
            };
            (p, probe)
        }
    }

    impl LineProcess for ScriptedProcess {
        fn name(&self) -> &str {
            &self.name
        }

        fn write_line(&mut self, line: &str) -> io::Result<()> {
            if self.broken_pipe {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.probe.sent.borrow_mut().push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self, _timeout: Option<Duration>) -> io::Result<ReadResult> {
            if self.panic_on_read {
                panic!("scripted fault");
            }
            Ok(self.replies.pop_front().unwrap_or(ReadResult::Disconnected))
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn terminate(&mut self) {
            self.probe.terminations.set(self.probe.terminations.get() + 1);
        }
    }

    fn job(id: u64) -> MatchJob {
        MatchJob {
            id,
            arbiter: PathBuf::from("arbiter"),
            competitors: [PathBuf::from("a"), PathBuf::from("b")],
            verbose: false,
            read_timeout: None,
        }
    }

    struct Fixture {
        arbiter: ScriptedProcess,
        a: ScriptedProcess,
        b: ScriptedProcess,
        probes: [Rc<Probe>; 3],
    }

    impl Fixture {
        fn new(arbiter: &[&str], a: &[&str], b: &[&str]) -> Fixture {
            let (arbiter, pr) = ScriptedProcess::new("arbiter", arbiter);
            let (a, pa) = ScriptedProcess::new("a", a);
            let (b, pb) = ScriptedProcess::new("b", b);
            Fixture {
                arbiter,
                a,
                b,
                probes: [pr, pa, pb],
            }
        }

        fn play(self, job: &MatchJob) -> (MatchOutcome, [Rc<Probe>; 3]) {
            let Fixture {
                arbiter,
                a,
                b,
                probes,
            } = self;
            let outcome =
                play_match_with(job, move |_| Ok(MatchProcesses::new(arbiter, a, b)));
            for probe in &probes {
                assert_eq!(probe.terminations.get(), 1);
            }
            (outcome, probes)
        }
    }

    #[test]
    fn arbiter_error_on_start() {
        let (outcome, probes) = Fixture::new(&["ERR bad-args"], &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Error);
        assert_eq!(outcome.winner_side, None);
        assert_eq!(outcome.reason, "ERR bad-args");
        assert_eq!(*probes[0].sent.borrow(), vec!["START 0"]);
    }

    #[test]
    fn draw_after_three_plies() {
        let arbiter = [
            "READY", "IN-PLAY", "board1", "OK", //
            "MOVED", "IN-PLAY", "board2", "OK", //
            "MOVED", "IN-PLAY", "board3", "OK", //
            "MOVED", "DRAW", "board4", "fifty-move rule",
        ];
        let (outcome, probes) =
            Fixture::new(&arbiter, &["a1", "a2"], &["b1", "b2"]).play(&job(0));

        assert_eq!(outcome.decision, Decision::Draw);
        assert_eq!(outcome.winner_side, None);
        assert_eq!(outcome.reason, "fifty-move rule");
        assert_eq!(outcome.plies, 3);

        // Match 0: B is RED and moves first.
        assert_eq!(
            *probes[0].sent.borrow(),
            vec!["START 0", "STATE", "b1", "STATE", "a1", "STATE", "b2", "STATE"]
        );
        assert_eq!(*probes[1].sent.borrow(), vec!["board2"]);
        assert_eq!(*probes[2].sent.borrow(), vec!["board1", "board3"]);
    }

    #[test]
    fn red_win_maps_to_competitor_on_red() {
        let arbiter = ["READY", "RED WINS", "board", "checkmate"];

        let (outcome, _) = Fixture::new(&arbiter, &[], &[]).play(&job(1));
        assert_eq!(outcome.decision, Decision::Win(Competitor::A));
        assert_eq!(outcome.winner_side, Some(Side::Red));
        assert_eq!(outcome.reason, "checkmate");

        let (outcome, _) = Fixture::new(&arbiter, &[], &[]).play(&job(2));
        assert_eq!(outcome.decision, Decision::Win(Competitor::B));
    }

    #[test]
    fn black_win_maps_to_competitor_on_black() {
        let arbiter = ["READY", "BLACK WINS", "board", "no moves"];
        let (outcome, _) = Fixture::new(&arbiter, &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Win(Competitor::A));
        assert_eq!(outcome.winner_side, Some(Side::Black));
    }

    #[test]
    fn crash_on_ply_two_of_odd_match() {
        let arbiter = [
            "READY", "IN-PLAY", "board1", "OK", //
            "MOVED", "IN-PLAY", "board2", "OK",
        ];
        let mut fixture = Fixture::new(&arbiter, &["a1"], &[]);
        fixture.b.alive = false;
        let (outcome, probes) = fixture.play(&job(1));

        assert_eq!(outcome.decision, Decision::Win(Competitor::A));
        assert_eq!(outcome.winner_side, Some(Side::Red));
        assert!(outcome.reason.contains("crash"));
        assert!(probes[2].sent.borrow().is_empty());
    }

    #[test]
    fn closed_output_is_a_loss_for_the_mover() {
        let arbiter = ["READY", "IN-PLAY", "board1", "OK"];
        let (outcome, _) = Fixture::new(&arbiter, &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Win(Competitor::A));
        assert_eq!(outcome.winner_side, Some(Side::Black));
        assert_eq!(outcome.reason, "did not respond");
    }

    #[test]
    fn timeout_is_a_loss_for_the_mover() {
        let arbiter = ["READY", "IN-PLAY", "board1", "OK"];
        let mut fixture = Fixture::new(&arbiter, &[], &[]);
        fixture.a.replies.push_back(ReadResult::Timeout);
        let (outcome, _) = fixture.play(&job(1));
        assert_eq!(outcome.decision, Decision::Win(Competitor::B));
        assert_eq!(outcome.reason, "timed out");
    }

    #[test]
    fn broken_pipe_counts_as_crash() {
        let arbiter = ["READY", "IN-PLAY", "board1", "OK"];
        let mut fixture = Fixture::new(&arbiter, &[], &[]);
        fixture.b.broken_pipe = true;
        let (outcome, _) = fixture.play(&job(0));
        assert_eq!(outcome.decision, Decision::Win(Competitor::A));
        assert_eq!(outcome.reason, "crashed");
    }

    #[test]
    fn unknown_status_is_an_error() {
        let arbiter = ["READY", "STALEMATE?", "board", "???"];
        let (outcome, _) = Fixture::new(&arbiter, &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Error);
        assert!(outcome.reason.contains("STALEMATE?"));
    }

    #[test]
    fn silent_arbiter_is_an_error() {
        let (outcome, _) = Fixture::new(&[], &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Error);

        let (outcome, _) = Fixture::new(&["READY", "IN-PLAY", "board"], &[], &[]).play(&job(0));
        assert_eq!(outcome.decision, Decision::Error);
    }

    #[test]
    fn panic_becomes_error_and_still_terminates() {
        let mut fixture = Fixture::new(&[], &[], &[]);
        fixture.arbiter.panic_on_read = true;
        let (outcome, _) = fixture.play(&job(3));
        assert_eq!(outcome.decision, Decision::Error);
        assert!(outcome.reason.contains("scripted fault"));
    }

    #[test]
    fn spawn_failure_is_an_error_outcome() {
        let mut j = job(0);
        j.arbiter = PathBuf::from("/nonexistent/showdown-arbiter");
        let outcome = play_match(&j);
        assert_eq!(outcome.decision, Decision::Error);
        assert!(outcome.reason.contains("showdown-arbiter"));
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(ArbiterStatus::parse("IN-PLAY"), ArbiterStatus::InPlay);
        assert_eq!(ArbiterStatus::parse("RED WINS"), ArbiterStatus::RedWins);
        assert_eq!(ArbiterStatus::parse("BLACK WINS"), ArbiterStatus::BlackWins);
        assert_eq!(ArbiterStatus::parse("DRAW"), ArbiterStatus::Draw);
        assert_eq!(
            ArbiterStatus::parse("red wins"),
            ArbiterStatus::Unknown("red wins".to_string())
        );
    }
}
