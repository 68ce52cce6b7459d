//! The control loop's command block: a tiny RPC carrying an opcode and one 64-bit word each way

use super::{
    bank::{
        self,
        RegisterBank,
        RegisterHandle,
    },
    BusRequest,
    BusResponse,
    Slave,
};
use sharedbus_utils::manifest::Access;

/// Set on the opcode to write the parameter instead of only reading it back
pub const WRITE_BIT: u8 = 0x80;

/// Parameters reachable through the command block
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Nonzero while the loop is running
    Status = 1,
    Setpoint = 2,
    Proportional = 3,
    Integral = 4,
    Error = 5,
    Z = 6,
    /// Loop iterations since the last write
    Cycles = 7,
    Delay = 8,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Status,
        Command::Setpoint,
        Command::Proportional,
        Command::Integral,
        Command::Error,
        Command::Z,
        Command::Cycles,
        Command::Delay,
    ];

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code & !WRITE_BIT)
    }
}

#[derive(Debug, Clone)]
pub struct ControlLoopEngine {
    bank: RegisterBank,
    params: [i64; Command::ALL.len()],
    cmd: RegisterHandle,
    word_in_hi: RegisterHandle,
    word_in_lo: RegisterHandle,
    start_cmd: RegisterHandle,
    word_out_hi: RegisterHandle,
    word_out_lo: RegisterHandle,
    finish_cmd: RegisterHandle,
    in_loop: RegisterHandle,
}

impl ControlLoopEngine {
    /// # Errors
    /// Never in practice, the layout is fixed
    pub fn new() -> Result<Self, bank::Error> {
        let mut builder = RegisterBank::builder();
        let cmd = builder.add_register("cmd", Access::ReadWrite, 8)?;
        let word_in_hi = builder.add_register("word_in_hi", Access::ReadWrite, 32)?;
        let word_in_lo = builder.add_register("word_in_lo", Access::ReadWrite, 32)?;
        let start_cmd = builder.add_register("start_cmd", Access::ReadWrite, 1)?;
        let word_out_hi = builder.add_register("word_out_hi", Access::ReadOnly, 32)?;
        let word_out_lo = builder.add_register("word_out_lo", Access::ReadOnly, 32)?;
        let finish_cmd = builder.add_register("finish_cmd", Access::ReadOnly, 1)?;
        let in_loop = builder.add_register("in_loop", Access::ReadOnly, 1)?;
        Ok(Self {
            bank: builder.build(),
            params: [0; Command::ALL.len()],
            cmd,
            word_in_hi,
            word_in_lo,
            start_cmd,
            word_out_hi,
            word_out_lo,
            finish_cmd,
            in_loop,
        })
    }

    #[must_use]
    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    /// The current value of a parameter
    #[must_use]
    pub fn param(&self, command: Command) -> i64 {
        self.params[usize::from(command.code() - 1)]
    }

    fn execute(&mut self) {
        #[allow(clippy::cast_possible_truncation)]
        let opcode = self.bank.value(self.cmd) as u8;
        let Some(command) = Command::from_code(opcode) else {
            tracing::warn!("unknown control loop opcode {opcode:#x}");
            self.respond(0);
            return;
        };
        let slot = usize::from(command.code() - 1);
        if opcode & WRITE_BIT != 0 {
            let word = (u64::from(self.bank.value(self.word_in_hi)) << 32)
                | u64::from(self.bank.value(self.word_in_lo));
            #[allow(clippy::cast_possible_wrap)]
            let value = word as i64;
            self.params[slot] = value;
            if command == Command::Status {
                self.params[usize::from(Command::Cycles.code() - 1)] = 0;
            }
            tracing::debug!("control loop {command:?} <- {value}");
        }
        self.respond(self.params[slot]);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn respond(&mut self, value: i64) {
        let word = value as u64;
        self.bank.drive(self.word_out_hi, (word >> 32) as u32);
        self.bank.drive(self.word_out_lo, word as u32);
        self.bank.drive(self.finish_cmd, 1);
    }
}

impl Slave for ControlLoopEngine {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.bank.transact(req)
    }

    fn tick(&mut self) {
        let start = self.bank.value(self.start_cmd) == 1;
        let finished = self.bank.value(self.finish_cmd) == 1;
        if start && !finished {
            self.execute();
        } else if !start && finished {
            self.bank.drive(self.finish_cmd, 0);
        }
        let running = self.param(Command::Status) != 0;
        self.bank.drive(self.in_loop, u32::from(running));
        if running {
            self.params[usize::from(Command::Cycles.code() - 1)] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(engine: &ControlLoopEngine, name: &str) -> u32 {
        engine.bank().layout().get(name).unwrap().offset
    }

    fn rpc(engine: &mut ControlLoopEngine, cmd: u8, word: u64) -> u64 {
        for (name, value) in [
            ("word_in_hi", (word >> 32) as u32),
            ("word_in_lo", word as u32),
            ("cmd", u32::from(cmd)),
            ("start_cmd", 1),
        ] {
            let at = offset(engine, name);
            engine.transact(&BusRequest::write(at, value));
        }
        engine.tick();
        assert_eq!(engine.bank().read(offset(engine, "finish_cmd")).unwrap(), 1);
        let hi = engine.bank().read(offset(engine, "word_out_hi")).unwrap();
        let lo = engine.bank().read(offset(engine, "word_out_lo")).unwrap();
        let at = offset(engine, "start_cmd");
        engine.transact(&BusRequest::write(at, 0));
        engine.tick();
        (u64::from(hi) << 32) | u64::from(lo)
    }

    #[test]
    fn test_commands() {
        assert_eq!(Command::from_code(0x83), Some(Command::Proportional));
        assert_eq!(Command::from_code(9), None);
        let mut engine = ControlLoopEngine::new().unwrap();
        let gain = -(3i64 << 40);
        rpc(&mut engine, WRITE_BIT | Command::Integral.code(), gain as u64);
        assert_eq!(engine.param(Command::Integral), gain);
        assert_eq!(rpc(&mut engine, Command::Integral.code(), 0) as i64, gain);
        // Reads don't write
        assert_eq!(engine.param(Command::Integral), gain);
    }

    #[test]
    fn test_cycles() {
        let mut engine = ControlLoopEngine::new().unwrap();
        rpc(&mut engine, WRITE_BIT | Command::Status.code(), 1);
        for _ in 0..10 {
            engine.tick();
        }
        assert!(engine.param(Command::Cycles) >= 10);
        assert_eq!(engine.bank().read(offset(&engine, "in_loop")).unwrap(), 1);
    }
}
