use modbus_slot_server::{
    ConfigError, ExceptionCode, MbapHeader, ModbusRequest, ModbusTransportError, ModbusUnitError,
    ProtocolEngine, RegisterStore, RegisterType, ServerConfig, StoreError, TableSizes,
    UnitMismatchPolicy, execute, frame_ready, take_frame,
};

fn store() -> RegisterStore {
    RegisterStore::new(10, 10, 10, 10)
}

#[cfg(test)]
mod store_tests {
    use super::*;

    #[test]
    fn test_store_starts_zeroed() {
        let store = store();
        assert_eq!(store.read_bits(RegisterType::CoilRegister, 0, 10).unwrap(), &[false; 10]);
        assert_eq!(store.read_words(RegisterType::InputRegister, 0, 10).unwrap(), &[0u16; 10]);
        assert_eq!(store.size(RegisterType::HoldingRegister), 10);
    }

    #[test]
    fn test_store_out_of_range() {
        let mut store = store();
        assert!(matches!(
            store.holding_register(10),
            Err(StoreError::OutOfRange { start: 10, quantity: 1, size: 10, .. })
        ));
        assert!(store.write_holding_registers(8, &[1, 2, 3]).is_err());
        // nothing written on a partial overlap
        assert_eq!(store.holding_register(8).unwrap(), 0);
        assert_eq!(store.holding_register(9).unwrap(), 0);
    }

    #[test]
    fn test_store_wrong_table_kind() {
        let store = store();
        assert_eq!(
            store.read_bits(RegisterType::HoldingRegister, 0, 1),
            Err(StoreError::TypeMismatch(RegisterType::HoldingRegister))
        );
    }

    #[test]
    fn test_store_local_writes_to_read_only_tables() {
        let mut store = store();
        store.set_discrete_input(3, true).unwrap();
        store.set_input_register(4, 0xBEEF).unwrap();
        assert!(store.discrete_input(3).unwrap());
        assert_eq!(store.input_register(4).unwrap(), 0xBEEF);
    }
}

#[cfg(test)]
mod pdu_tests {
    use super::*;

    #[test]
    fn test_read_holding_registers() {
        let mut store = store();
        store.set_holding_register(1, 0x1234).unwrap();
        store.set_holding_register(2, 0x5678).unwrap();

        let response = execute(&mut store, &[0x03, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(response, vec![0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_read_coils_packs_lsb_first() {
        let mut store = store();
        store.set_coil(0, true).unwrap();
        store.set_coil(2, true).unwrap();
        store.set_coil(9, true).unwrap();

        let response = execute(&mut store, &[0x01, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(response, vec![0x01, 0x02, 0b0000_0101, 0b0000_0010]);
    }

    #[test]
    fn test_read_discrete_inputs() {
        let mut store = store();
        store.set_discrete_input(1, true).unwrap();

        let response = execute(&mut store, &[0x02, 0x00, 0x00, 0x00, 0x03]).unwrap();
        assert_eq!(response, vec![0x02, 0x01, 0b0000_0010]);
    }

    #[test]
    fn test_write_single_coil() {
        let mut store = store();
        let request = [0x05, 0x00, 0x03, 0xFF, 0x00];
        assert_eq!(execute(&mut store, &request).unwrap(), request.to_vec());
        assert!(store.coil(3).unwrap());
    }

    #[test]
    fn test_write_single_coil_bad_value() {
        let mut store = store();
        assert_eq!(
            execute(&mut store, &[0x05, 0x00, 0x03, 0x12, 0x34]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert!(!store.coil(3).unwrap());
    }

    #[test]
    fn test_write_multiple_registers() {
        let mut store = store();
        let request = [0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00, 0x07, 0x01, 0x00];
        assert_eq!(execute(&mut store, &request).unwrap(), vec![0x10, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(store.holding_register(2).unwrap(), 7);
        assert_eq!(store.holding_register(3).unwrap(), 0x0100);
    }

    #[test]
    fn test_write_multiple_coils() {
        let mut store = store();
        let request = [0x0F, 0x00, 0x01, 0x00, 0x09, 0x02, 0b1000_0001, 0b0000_0001];
        assert_eq!(execute(&mut store, &request).unwrap(), vec![0x0F, 0x00, 0x01, 0x00, 0x09]);
        assert!(store.coil(1).unwrap());
        assert!(!store.coil(2).unwrap());
        assert!(store.coil(8).unwrap());
        assert!(store.coil(9).unwrap());
    }

    #[test]
    fn test_byte_count_mismatch() {
        let mut store = store();
        let request = [0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x07];
        assert_eq!(execute(&mut store, &request), Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_out_of_range_read_and_write() {
        let mut store = store();
        assert_eq!(
            execute(&mut store, &[0x03, 0x00, 0x09, 0x00, 0x02]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            execute(&mut store, &[0x06, 0x00, 0x0A, 0x00, 0x01]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            execute(&mut store, &[0x10, 0x00, 0x09, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(store.holding_register(9).unwrap(), 0);
    }

    #[test]
    fn test_zero_quantity() {
        let mut store = store();
        assert_eq!(
            execute(&mut store, &[0x04, 0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_unsupported_function() {
        let mut store = store();
        assert_eq!(execute(&mut store, &[0x2B, 0x0E, 0x01, 0x00]), Err(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn test_truncated_pdu() {
        let mut store = store();
        assert_eq!(execute(&mut store, &[0x03, 0x00]), Err(ExceptionCode::IllegalDataValue));
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn test_take_frame_waits_for_whole_frame() {
        let frame = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x00, 0x00, 0x00, 0x01];
        let mut buf = frame[..9].to_vec();
        assert!(!frame_ready(&buf));
        assert_eq!(take_frame(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 9);

        buf.extend_from_slice(&frame[9..]);
        buf.push(0x00); // first byte of the next frame
        assert!(frame_ready(&buf));
        assert_eq!(take_frame(&mut buf).unwrap(), Some(frame));
        assert_eq!(buf, vec![0x00]);
    }

    #[test]
    fn test_take_frame_rejects_bad_length() {
        let mut buf = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFF];
        assert!(frame_ready(&buf));
        assert_eq!(take_frame(&mut buf), Err(ModbusTransportError::InvalidLength(1)));

        let mut buf = vec![0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0xFF];
        assert_eq!(take_frame(&mut buf), Err(ModbusTransportError::InvalidLength(256)));
    }

    #[test]
    fn test_engine_echoes_transaction_and_unit() {
        let engine = ProtocolEngine::new(0xFF, UnitMismatchPolicy::Drop);
        let mut store = store();
        let request = [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x07, 0x06, 0x00, 0x00, 0x00, 0x29];

        let reply = engine.handle_frame(&request, &mut store).unwrap();
        assert_eq!(reply, request.to_vec());
        assert_eq!(store.holding_register(0).unwrap(), 41);
    }

    #[test]
    fn test_engine_exception_reply() {
        let engine = ProtocolEngine::new(0xFF, UnitMismatchPolicy::Drop);
        let mut store = store();
        let request = [0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x01];

        let reply = engine.handle_frame(&request, &mut store).unwrap();
        let header = MbapHeader::parse(&reply).unwrap();
        assert_eq!(header.transaction_id, 5);
        assert_eq!(header.length, 3);
        assert_eq!(&reply[7..], &[0x83, 0x02]);
    }

    #[test]
    fn test_engine_unit_mismatch_drop() {
        let engine = ProtocolEngine::new(0x01, UnitMismatchPolicy::Drop);
        let mut store = store();
        let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x06, 0x00, 0x00, 0x00, 0x29];

        assert_eq!(engine.handle_frame(&request, &mut store), None);
        assert_eq!(store.holding_register(0).unwrap(), 0);
    }

    #[test]
    fn test_engine_unit_mismatch_exception() {
        let engine = ProtocolEngine::new(0x01, UnitMismatchPolicy::Exception);
        let mut store = store();
        let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x06, 0x00, 0x00, 0x00, 0x29];

        let reply = engine.handle_frame(&request, &mut store).unwrap();
        assert_eq!(&reply[6..], &[0x02, 0x86, 0x0B]);
        assert_eq!(store.holding_register(0).unwrap(), 0);
    }

    #[test]
    fn test_engine_matching_unit() {
        let engine = ProtocolEngine::new(0x01, UnitMismatchPolicy::Drop);
        assert!(engine.accepts_unit(0x01));
        assert!(!engine.accepts_unit(0x02));
        assert!(ProtocolEngine::new(0xFF, UnitMismatchPolicy::Drop).accepts_unit(0x02));
    }

    #[test]
    fn test_engine_drops_foreign_protocol() {
        let engine = ProtocolEngine::new(0xFF, UnitMismatchPolicy::Exception);
        let mut store = store();
        let request = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x00, 0x29];

        assert_eq!(engine.handle_frame(&request, &mut store), None);
        assert_eq!(store.holding_register(0).unwrap(), 0);
    }
}

#[cfg(test)]
mod request_tests {
    use super::*;

    #[test]
    fn test_request_builder_missing_address() {
        let request = ModbusRequest::builder()
            .length(10)
            .register_type(RegisterType::HoldingRegister)
            .build();

        assert!(matches!(request, Err(ModbusUnitError::AddressIsEmpty)));
    }

    #[test]
    fn test_request_builder_range_overflow() {
        let request = ModbusRequest::builder()
            .address(65530)
            .length(10)
            .register_type(RegisterType::HoldingRegister)
            .build();

        assert!(matches!(request, Err(ModbusUnitError::RangeToMatch(65530, 10, 65540))));
    }

    #[test]
    fn test_read_request_format() {
        let mut request = ModbusRequest::builder()
            .address(100)
            .length(10)
            .register_type(RegisterType::HoldingRegister)
            .unit_id(1)
            .build()
            .unwrap();

        let frame = request.create_read_request();

        // MBAP header (7 bytes) + PDU (5 bytes) = 12 bytes total
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x64, 0x00, 0x0A]
        );
    }

    #[test]
    fn test_transaction_id_increments() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .register_type(RegisterType::InputRegister)
            .build()
            .unwrap();

        let req1 = request.create_read_request();
        let req2 = request.create_read_request();
        assert_eq!(req1[1], 0x01);
        assert_eq!(req2[1], 0x02);
        assert_eq!(request.transaction_id(), 2);
    }

    #[test]
    fn test_single_register_write() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .register_type(RegisterType::HoldingRegister)
            .build()
            .unwrap();

        let frame = request.create_write_request(&[41]).unwrap();
        assert_eq!(&frame[6..], &[0xFF, 0x06, 0x00, 0x00, 0x00, 0x29]);
    }

    #[test]
    fn test_multi_coil_write() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .length(3)
            .register_type(RegisterType::CoilRegister)
            .build()
            .unwrap();

        let frame = request.create_write_request(&[1, 0, 1]).unwrap();
        assert_eq!(&frame[7..], &[0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0b0000_0101]);
    }

    #[test]
    fn test_custom_write_command() {
        let mut request = ModbusRequest::builder()
            .address(1)
            .register_type(RegisterType::HoldingRegister)
            .with_write_cmd(0x10)
            .build()
            .unwrap();

        let frame = request.create_write_request(&[0x1234]).unwrap();
        assert_eq!(&frame[7..], &[0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_invalid_coil_value() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .length(2)
            .register_type(RegisterType::CoilRegister)
            .build()
            .unwrap();

        assert_eq!(
            request.create_write_request(&[1, 2]),
            Err(ModbusUnitError::InvalidCoilValue(2, 1))
        );
    }

    #[test]
    fn test_write_to_input_register() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .register_type(RegisterType::InputRegister)
            .build()
            .unwrap();

        assert!(matches!(
            request.create_write_request(&[1]),
            Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(RegisterType::InputRegister))
        ));
    }

    #[test]
    fn test_parse_read_response() {
        let mut request = ModbusRequest::builder()
            .address(100)
            .length(2)
            .register_type(RegisterType::HoldingRegister)
            .unit_id(1)
            .build()
            .unwrap();
        request.create_read_request();

        let response = vec![
            0x00, 0x01, // Transaction ID
            0x00, 0x00, // Protocol ID
            0x00, 0x07, // Length (7 = unit + fc + byte_count + 4 data bytes)
            0x01,       // Unit ID
            0x03,       // Function code
            0x04,       // Byte count (2 registers * 2 bytes)
            0x12, 0x34, // Register 1 = 0x1234
            0x56, 0x78, // Register 2 = 0x5678
        ];

        assert_eq!(request.parse_response(&response).unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn test_parse_exception_response() {
        let mut request = ModbusRequest::builder()
            .address(100)
            .register_type(RegisterType::HoldingRegister)
            .build()
            .unwrap();
        request.create_read_request();

        let response = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x83, 0x02];
        assert_eq!(
            request.parse_response(&response),
            Err(ModbusTransportError::Exception(0x03, 0x02))
        );
    }

    #[test]
    fn test_parse_frame_too_short() {
        let request = ModbusRequest::builder()
            .address(100)
            .register_type(RegisterType::HoldingRegister)
            .build()
            .unwrap();

        assert_eq!(
            request.parse_response(&[0x00, 0x01, 0x00]),
            Err(ModbusTransportError::FrameTooShort)
        );
    }

    #[test]
    fn test_parse_unit_id_mismatch() {
        let mut request = ModbusRequest::builder()
            .address(100)
            .register_type(RegisterType::HoldingRegister)
            .unit_id(1)
            .build()
            .unwrap();
        request.create_read_request();

        let response = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x02, 0x03, 0x02, 0x00, 0x01];
        assert_eq!(
            request.parse_response(&response),
            Err(ModbusTransportError::UnitIdMismatch { expected: 1, received: 2 })
        );
    }

    #[test]
    fn test_parse_stale_transaction() {
        let mut request = ModbusRequest::builder()
            .address(0)
            .register_type(RegisterType::HoldingRegister)
            .build()
            .unwrap();
        request.create_read_request();
        request.create_read_request();

        let response = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, 0x01];
        assert_eq!(
            request.parse_response(&response),
            Err(ModbusTransportError::TransactionIdMismatch { expected: 2, received: 1 })
        );
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 0xFF);
        assert_eq!(config.max_clients, 3);
        assert_eq!(config.idle_timeout_ms, 50_000);
        assert_eq!(config.tables.coils, 10);
        assert_eq!(config.tables.input_registers, 10);
        assert_eq!(config.unit_mismatch, UnitMismatchPolicy::Drop);
        assert_eq!(config.max_frames_per_poll, None);
        assert!(config.test_mutation);
    }

    #[test]
    fn test_builder_validation() {
        assert_eq!(ServerConfig::builder().max_clients(0).build(), Err(ConfigError::NoClientSlots));
        assert_eq!(ServerConfig::builder().idle_timeout_ms(0).build(), Err(ConfigError::ZeroIdleTimeout));
        assert_eq!(
            ServerConfig::builder().table_size(70_000).build(),
            Err(ConfigError::TableTooLarge(70_000))
        );
        assert_eq!(
            ServerConfig::builder().max_frames_per_poll(Some(0)).build(),
            Err(ConfigError::ZeroFrameBudget)
        );
        assert!(ServerConfig::builder().port(1502).max_clients(8).build().is_ok());
    }

    #[test]
    fn test_per_table_sizes() {
        let tables = TableSizes { coils: 64, ..TableSizes::uniform(20) };
        let config = ServerConfig::builder().table_size(5).tables(tables).build().unwrap();
        assert_eq!(config.tables.coils, 64);
        assert_eq!(config.tables.discrete_inputs, 20);
        assert_eq!(config.tables.holding_registers, 20);
        assert_eq!(config.tables.input_registers, 20);

        let oversized = TableSizes { input_registers: 65_537, ..TableSizes::default() };
        assert_eq!(
            ServerConfig::builder().tables(oversized).build(),
            Err(ConfigError::TableTooLarge(65_537))
        );
    }
}
