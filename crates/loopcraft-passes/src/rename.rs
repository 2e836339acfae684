use loopcraft_ir::Proc;

/// Give the kernel a new name. The body is untouched.
pub fn rename(proc: &Proc, name: &str) -> Proc {
    tracing::debug!(from = %proc.name, to = name, "rename");
    Proc {
        name: name.to_owned(),
        ..proc.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopcraft_ir::parse_proc;

    #[test]
    fn test_rename() {
        let proc = parse_proc("proc f(x: f32[4] @ DRAM) { x[0] = 1.0; }").unwrap();
        let out = rename(&proc, "f_scheduled");
        assert_eq!(out.name, "f_scheduled");
        assert_eq!(out.body, proc.body);
        assert_eq!(out.params, proc.params);
    }
}
