#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::dispatch::DisasmCore;
    use crate::format::{Listing, OutputFormat};
    use crate::options::{Color, Options};
    use crate::parser::tests::{tiny_elf, tiny_macho};
    use crate::parser::{BinaryLoader, GoblinLoader};
    use crate::render::OperandGroup;
    use crate::{DisasmMode, DisasmOptions, RelType, SignatureType, Syntax};

    // push rbp; mov rbp, rsp; call next; pop rbp; ret
    const PROLOGUE: [u8; 11] = [0x55, 0x48, 0x89, 0xe5, 0xe8, 0x00, 0x00, 0x00, 0x00, 0x5d, 0xc3];

    fn write_temp(suffix: &str, data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(data).unwrap();
        file
    }

    /// 7z signature header followed directly by `header`.
    fn seven_zip_archive(header: &[u8]) -> Vec<u8> {
        let mut out = vec![b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04];
        out.extend_from_slice(&0u32.to_le_bytes()); // start header CRC
        out.extend_from_slice(&0u64.to_le_bytes()); // next header offset
        out.extend_from_slice(&(header.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // next header CRC
        out.extend_from_slice(header);
        out
    }

    #[test]
    fn test_elf_entry_pipeline() {
        let data = tiny_elf(&PROLOGUE);
        let image = GoblinLoader::new().load(&data, Some("prologue")).unwrap();
        let core = DisasmCore::with_mode(image.mode).unwrap();

        let entry = image.entry_point.unwrap();
        let offset = image.memory_map.address_to_offset(entry).unwrap() as usize;
        let window = &data[offset..];
        let records = core.disasm_list(window, entry, &DisasmOptions::default(), -1, None);

        let listing: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        assert_eq!(listing, vec!["push rbp", "mov rbp, rsp", "call 0x400081", "pop rbp", "ret"]);
        assert_eq!(records[2].rel_type, RelType::Call);
        assert_eq!(records[2].next_address, 0x400081);
        assert!(records[4].is_ret);

        let text = OutputFormat::Text
            .get_formatter()
            .format(&Listing::new(entry, window, &records))
            .unwrap();
        assert!(text.contains("0x0040007c: call"));
        assert!(text.contains("e8 00 00 00 00"));
    }

    #[test]
    fn test_elf_signatures() {
        let data = tiny_elf(&PROLOGUE);
        let image = GoblinLoader::new().load(&data, None).unwrap();
        let core = DisasmCore::with_mode(image.mode).unwrap();
        let map = &image.memory_map;
        let entry = image.entry_point.unwrap();

        assert_eq!(core.get_signature(&data, map, entry, SignatureType::Full, 4), "554889e5e8000000005d");
        assert_eq!(core.get_signature(&data, map, entry, SignatureType::Mask, 4), "554889e5e8........5d");
        assert_eq!(core.get_signature(&data, map, entry, SignatureType::Rel, 4), "554889e5e8$$$$$$$$5d");

        let records = core.get_signature_records(&data, map, 0x78, 5, SignatureType::Rel);
        assert_eq!(records.len(), 5);
        assert_eq!(records[2].opcode, "call 0x400081");
        assert_eq!(records[4].address, 0x400082);
    }

    #[test]
    fn test_com_file_to_csv() {
        // mov ah, 9; int 0x21; ret
        let file = write_temp(".com", &[0xb4, 0x09, 0xcd, 0x21, 0xc3]);
        let (data, image) = GoblinLoader::new().load_file(file.path()).unwrap();
        assert_eq!(image.mode, DisasmMode::X86_16);

        let core = DisasmCore::with_mode(image.mode).unwrap();
        let entry = image.entry_point.unwrap();
        let records = core.disasm_list(&data, entry, &DisasmOptions::default(), -1, None);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].address, 0x102);

        let csv = OutputFormat::Csv
            .get_formatter()
            .format(&Listing::new(entry, &data, &records))
            .unwrap();
        let mut reader = ::csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<::csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][1], "0x102");
        assert_eq!(&rows[1][3], "int");
        assert_eq!(&rows[1][5], "cd 21");
    }

    #[test]
    fn test_macho_dyld_streams() {
        let rebase = [0x11, 0x22, 0x10, 0x51, 0x00];
        let export = [0x00, 0x00];
        let data = tiny_macho(&rebase, &export);
        let image = GoblinLoader::new().load(&data, None).unwrap();
        let streams = image.macho_streams.clone().unwrap();

        let mut core = DisasmCore::with_mode(DisasmMode::CustomMachRebase).unwrap();
        let range = streams.range_for(core.mode()).unwrap();
        let window = &data[range.offset as usize..(range.offset + range.size) as usize];
        let records = core.disasm_list(window, range.offset, &DisasmOptions::default(), -1, None);
        let mnemonics: Vec<&str> = records.iter().map(|r| r.mnemonic.as_str()).collect();
        assert_eq!(mnemonics, vec!["SET_TYPE_IMM", "SET_SEGMENT_AND_OFFSET_ULEB", "DO_REBASE_IMM_TIMES", "DONE"]);
        assert_eq!(records[0].address, 80);

        let json = OutputFormat::JsonLines
            .get_formatter()
            .format(&Listing::new(range.offset, window, &records))
            .unwrap();
        let second: serde_json::Value = serde_json::from_str(json.lines().nth(1).unwrap()).unwrap();
        assert_eq!(second["bytes"], "2210");
        assert_eq!(second["operands"], "0x2, 0x10");

        core.set_mode(DisasmMode::CustomMachExport).unwrap();
        let range = streams.range_for(core.mode()).unwrap();
        let window = &data[range.offset as usize..(range.offset + range.size) as usize];
        let records = core.disasm_list(window, range.offset, &DisasmOptions::default(), -1, None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].to_string(), "CHILD_COUNT 0x0");
    }

    #[test]
    fn test_seven_zip_header_pipeline() {
        let header = [0x01, 0x05, 0x02, 0x11, 0x03, 0x41, 0x00, 0x00, 0x0E, 0x01, 0x80, 0x00, 0x00];
        let file = write_temp(".7z", &seven_zip_archive(&header));
        let (data, image) = GoblinLoader::new().load_file(file.path()).unwrap();
        assert_eq!(image.mode, DisasmMode::Unknown);

        let next_header = 32 + u64::from_le_bytes(data[12..20].try_into().unwrap()) as usize;
        let core = DisasmCore::with_mode(DisasmMode::Custom7ZipProperties).unwrap();
        let records = core.disasm_list(&data[next_header..], next_header as u64, &DisasmOptions::default(), -1, None);

        assert_eq!(records.len(), 11);
        assert_eq!(records[0].mnemonic, "kHeader");
        assert_eq!(records[0].address, 32);
        assert_eq!(records.last().unwrap().next_address, data.len() as u64);

        let json = OutputFormat::Json
            .get_formatter()
            .format(&Listing::new(next_header as u64, &data[next_header..], &records))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"][3]["mnemonic"], "kName");
    }

    #[test]
    fn test_options_file_drives_syntax_and_colors() {
        let options = r##"{
            "Disasm/Syntax": "ATT",
            "Disasm/Color/X86/Opcode/Call": "red|",
            "Disasm/Color/Numbers": "#00ff00|#000000"
        }"##;
        let file = write_temp(".json", options.as_bytes());
        let options = Options::load(file.path()).unwrap();

        let data = tiny_elf(&PROLOGUE);
        let image = GoblinLoader::new().load(&data, None).unwrap();
        let mut core = DisasmCore::with_mode(image.mode).unwrap();
        core.set_options(&options).unwrap();
        assert_eq!(core.syntax(), Syntax::Att);

        let records = core.disasm_list(&data[0x78..], 0x400078, &DisasmOptions::default(), -1, None);
        assert_eq!(records[0].to_string(), "pushq %rbp");

        let spans = core.text_spans(&records[2]);
        assert_eq!(spans[0].group, Some(OperandGroup::OpcodeCall));
        assert_eq!(spans[0].color.main, Some(Color::rgb(0xff, 0, 0)));
        let number = spans.iter().find(|span| span.group == Some(OperandGroup::Numbers)).unwrap();
        assert_eq!(number.color.background, Some(Color::rgb(0, 0, 0)));
    }

    #[test]
    fn test_uppercase_and_operandless_listing() {
        let data = tiny_elf(&PROLOGUE);
        let core = DisasmCore::with_mode(DisasmMode::X86_64).unwrap();

        let upper = DisasmOptions { uppercase: true, no_operands: false };
        let records = core.disasm_list(&data[0x78..], 0x400078, &upper, 2, None);
        assert_eq!(records[1].to_string(), "MOV RBP, RSP");

        let bare = DisasmOptions { uppercase: false, no_operands: true };
        let records = core.disasm_list(&data[0x78..], 0x400078, &bare, -1, None);
        assert!(records.iter().all(|r| r.operands.is_empty()));
        assert_eq!(records.len(), 5);
    }
}
