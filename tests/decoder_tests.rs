#[cfg(test)]
mod tests {
    use rstest::rstest;
    use wasm_embed::parser::encoding::*;
    use wasm_embed::parser::{decode_module, DecodeErrorKind, Section};
    use wasm_embed::types::{ExternType, FuncType, GlobalType, Limits, MemoryType, Mutability, TableType, ValueKind};

    /// Header plus the given `(id, payload)` sections
    fn module(sections: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut binary = vec![];
        write_header(&mut binary);
        for (id, payload) in sections {
            write_section(&mut binary, *id, payload);
        }
        binary
    }

    #[test]
    fn test_imports_and_exports_in_order() {
        let binary = wat::parse_str(
            r#"(module
                (import "env" "log" (func (param i32)))
                (import "env" "table" (table 1 2 funcref))
                (import "js" "mem" (memory 1))
                (import "js" "g" (global (mut f64)))
                (func (export "run") (result i64) i64.const 0)
                (export "log" (func 0))
                (export "mem" (memory 0))
                (export "g" (global 0)))"#,
        )
        .unwrap();
        let interface = decode_module(&binary).unwrap();

        let imports = interface
            .imports
            .iter()
            .map(|i| (i.module(), i.name(), i.ty().clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            imports,
            vec![
                ("env", "log", ExternType::Func(FuncType::new([ValueKind::I32], []))),
                (
                    "env",
                    "table",
                    ExternType::Table(TableType::new(ValueKind::FuncRef, Limits::new(1, 2)))
                ),
                ("js", "mem", ExternType::Memory(MemoryType::new(Limits::at_least(1)))),
                ("js", "g", ExternType::Global(GlobalType::new(ValueKind::F64, Mutability::Var))),
            ]
        );

        let exports = interface.exports.iter().map(|e| e.name()).collect::<Vec<_>>();
        assert_eq!(exports, ["run", "log", "mem", "g"]);
        assert_eq!(interface.exports[0].ty().func().unwrap().results(), [ValueKind::I64]);
        assert_eq!(interface.exports[1].ty(), interface.imports[0].ty());
    }

    #[test]
    fn test_function_index_space_puts_imports_first() {
        let binary = wat::parse_str(
            r#"(module
                (import "a" "x" (func (result i32)))
                (import "a" "y" (func (param f32)))
                (func (param i64))
                (func)
                (func (result f64) f64.const 0))"#,
        )
        .unwrap();
        let interface = decode_module(&binary).unwrap();
        assert_eq!(interface.funcs.len(), 5);
        assert_eq!(interface.funcs[0], FuncType::new([], [ValueKind::I32]));
        assert_eq!(interface.funcs[1], FuncType::new([ValueKind::F32], []));
        assert_eq!(interface.funcs[2], FuncType::new([ValueKind::I64], []));
        assert_eq!(interface.funcs[4], FuncType::new([], [ValueKind::F64]));
    }

    #[rstest]
    #[case(vec![0x01, 0x01, 0x02], Limits::new(1, 2))]
    #[case(vec![0x00, 0x01], Limits::at_least(1))]
    #[case(vec![0x00, 0x80, 0x80, 0x04], Limits::at_least(65536))]
    fn test_memory_limits(#[case] limits: Vec<u8>, #[case] expected: Limits) {
        let mut payload = vec![0x01];
        payload.extend(limits);
        let binary = module(&[(SECTION_MEMORY, payload)]);
        assert_eq!(decode_module(&binary).unwrap().memories, [MemoryType::new(expected)]);
    }

    #[rstest]
    #[case::bad_magic(b"\0asn\x01\0\0\0".to_vec(), Section::Header)]
    #[case::bad_version(b"\0asm\x02\0\0\0".to_vec(), Section::Header)]
    #[case::truncated_header(b"\0asm\x01".to_vec(), Section::Header)]
    #[case::section_past_end(module(&[(SECTION_TYPE, vec![0x01, 0x60])])[..11].to_vec(), Section::Header)]
    #[case::unknown_val_type(module(&[(SECTION_TYPE, vec![0x01, 0x60, 0x01, 0x7b, 0x00])]), Section::Type)]
    #[case::bad_type_tag(module(&[(SECTION_TYPE, vec![0x01, 0x61, 0x00, 0x00])]), Section::Type)]
    #[case::oversized_leb(module(&[(SECTION_MEMORY, vec![0x01, 0x00, 0x80, 0x80, 0x80, 0x80, 0x10])]), Section::Memory)]
    #[case::overlong_leb(module(&[(SECTION_MEMORY, vec![0x01, 0x00, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00])]), Section::Memory)]
    #[case::bad_limits_flag(module(&[(SECTION_MEMORY, vec![0x01, 0x02, 0x00])]), Section::Memory)]
    #[case::min_above_max(module(&[(SECTION_MEMORY, vec![0x01, 0x01, 0x02, 0x01])]), Section::Memory)]
    #[case::bad_utf8_name(module(&[(SECTION_EXPORT, vec![0x01, 0x01, 0xff, 0x00, 0x00])]), Section::Export)]
    #[case::export_index_out_of_range(module(&[(SECTION_EXPORT, vec![0x01, 0x01, b'f', 0x00, 0x00])]), Section::Export)]
    #[case::unknown_export_kind(module(&[(SECTION_EXPORT, vec![0x01, 0x01, b'f', 0x07, 0x00])]), Section::Export)]
    #[case::unknown_import_type(module(&[(SECTION_IMPORT, vec![0x01, 0x01, b'm', 0x01, b'f', 0x00, 0x03])]), Section::Import)]
    fn test_malformed_modules_are_errors(#[case] binary: Vec<u8>, #[case] section: Section) {
        let err = decode_module(&binary).unwrap_err();
        assert_eq!(err.section, section, "{err}");
        assert!(err.offset <= binary.len(), "{}", err);
    }

    #[test]
    fn test_error_reports_absolute_offset() {
        let binary = module(&[(SECTION_TYPE, vec![0x01, 0x60, 0x01, 0x7b, 0x00])]);
        let err = decode_module(&binary).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownValType(0x7b));
        // header (8) + section id and size (2) + count, tag, param count (3)
        assert_eq!(err.offset, 13);
    }

    #[test]
    fn test_leb_overflow_is_not_truncated() {
        let binary = module(&[(SECTION_MEMORY, vec![0x01, 0x00, 0x80, 0x80, 0x80, 0x80, 0x10])]);
        assert_eq!(decode_module(&binary).unwrap_err().kind, DecodeErrorKind::IntegerOverflow);
    }
}
