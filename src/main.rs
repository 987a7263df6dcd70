fn main() {
    match agent_doctor::cli::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            agent_doctor::ui::eprintln_error(&err);
            std::process::exit(agent_doctor::exit::exit_code(&err));
        }
    }
}
