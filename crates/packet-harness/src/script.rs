use packet_gen::RegisterClass;

/// File name of the debugger script inside a trial directory.
pub const SCRIPT_FILE_NAME: &str = "test_case_script.lldb";

const CONTROL_REGS: &str = "sa0 lc0 sa1 lc1 p3_0 m0 m1 usr pc ugp gp cs0 cs1 framelimit framekey";
const SYSTEM_REGS: &str = "ipendad vid vid1 bestwait schedcfg evb modectl syscfg";

/// Debugger script that stops at every entry to `test_case` and at `test_end`, dumps the
/// architectural state and resumes.
pub fn debugger_script() -> String {
    let gprs = RegisterClass::General.registers().join(" ");
    let vecs: Vec<&str> = RegisterClass::Vector
        .registers()
        .iter()
        .chain(RegisterClass::VectorPredicate4.registers())
        .map(String::as_str)
        .collect();

    format!(
        "breakpoint set --name test_case
breakpoint set --name test_end
breakpoint command add 1 2
register read badva0 ccr
register read {gprs}
register read {CONTROL_REGS}
register read {vecs}
register read {SYSTEM_REGS}
continue
DONE
run
",
        vecs = vecs.join(" "),
    )
}
