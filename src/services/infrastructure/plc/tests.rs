// 文件: src/services/infrastructure/plc/tests.rs
// PLC标签访问相关的单元测试

#[cfg(test)]
mod tests {
    use crate::models::enums::MeasurementType;
    use crate::models::structs::TagValue;
    use crate::services::infrastructure::plc::{
        ConventionalTagAddressResolver, GeneralParameterField, GlobalField, ITagAddressResolver,
        ITagReader, MockTagReader, SerializedTagReader, StatusField,
    };
    use crate::services::traits::BaseService;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// 测试Mock读取器的基本读写
    #[tokio::test]
    async fn test_mock_reader_basic_read_write() {
        let reader = MockTagReader::new();
        assert_eq!(reader.service_name(), "MockTagReader");
        assert_ok!(reader.health_check().await);

        reader.preset_value("Block1.Ventil1.Zaehler", 42u64);
        assert_eq!(reader.read_u64("Block1.Ventil1.Zaehler").await.unwrap(), 42);

        reader.write("Block1.VentilSperre", TagValue::from(0x00F0u16)).await.unwrap();
        assert!(reader.was_node_written("Block1.VentilSperre"));
        assert_eq!(reader.peek("Block1.VentilSperre"), Some(TagValue::Int(0xF0)));

        let stats = reader.get_stats();
        assert_eq!(stats.successful_reads, 1);
        assert_eq!(stats.successful_writes, 1);
    }

    /// 测试未知节点、失败节点和断开连接
    #[tokio::test]
    async fn test_mock_reader_failures() {
        let reader = MockTagReader::new();
        let err = reader.read("Nope").await.unwrap_err();
        assert_eq!(err.error_code(), "NODE_READ_ERROR");

        reader.preset_value("A", 1i64);
        reader.fail_node("A");
        assert_err!(reader.read("A").await);
        reader.heal_node("A");
        assert_ok!(reader.read("A").await);

        reader.set_connected(false);
        let err = reader.read("A").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTIVITY_ERROR");
        assert_err!(reader.health_check().await);
        assert_eq!(reader.get_stats().failed_reads, 3);
    }

    /// 测试脚本化序列：依次返回，耗尽后保持最后一个值
    #[tokio::test]
    async fn test_mock_reader_scripted_sequence() {
        let reader = MockTagReader::new();
        reader.script_values("C", vec![1u64, 2, 5]);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(reader.read_u64("C").await.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 5, 5, 5]);
        assert_eq!(reader.read_count("C"), 5);
    }

    /// 测试类型化读取的类型错误
    #[tokio::test]
    async fn test_typed_read_type_mismatch() {
        let reader = MockTagReader::new();
        reader.preset_value("Global.Version", "V2.1");
        let err = reader.read_u64("Global.Version").await.unwrap_err();
        assert_eq!(err.error_code(), "NODE_READ_ERROR");
        assert!(reader.read_f64("Global.Version").await.is_err());
    }

    /// 测试串行化读取器：并发调用在底层不重叠
    #[tokio::test]
    async fn test_serialized_reader_runs_calls_one_at_a_time() {
        let mock = MockTagReader::new();
        mock.preset_value("X", 1i64);
        mock.set_read_delay(20);
        let shared = SerializedTagReader::new(Arc::new(mock.clone()));

        let started = tokio::time::Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let reader = shared.clone();
            handles.push(tokio::spawn(async move { reader.read("X").await }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }
        // 4 次 20ms 的读取串行执行
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(mock.read_count("X"), 4);
    }

    /// 测试串行化读取器的调用超时
    #[tokio::test]
    async fn test_serialized_reader_call_timeout() {
        let mock = MockTagReader::new();
        mock.preset_value("Slow", 1i64);
        mock.set_read_delay(200);
        let shared = SerializedTagReader::new(Arc::new(mock)).with_call_timeout_ms(20);
        let err = shared.read("Slow").await.unwrap_err();
        assert_eq!(err.error_code(), "NODE_READ_ERROR");
        assert!(err.to_string().contains("超时"));
    }

    /// 测试默认命名约定
    #[test]
    fn test_conventional_node_ids() {
        let resolver = ConventionalTagAddressResolver;
        assert_eq!(
            resolver.ready_counter(2, 7, MeasurementType::Flow),
            "Block2.Ventil7.Durchfluss.DatenReady"
        );
        assert_eq!(
            resolver.status_field(1, 16, MeasurementType::Force, StatusField::MessId),
            "Block1.Ventil16.Kraft.MessID"
        );
        assert_eq!(resolver.valve_counter(3, 1), "Block3.Ventil1.Zaehler");
        assert_eq!(resolver.valve_sperre(4), "Block4.VentilSperre");
        assert_eq!(resolver.global_field(GlobalField::TemperaturePlc), "Global.TemperaturePLC");
        assert_eq!(
            resolver.general_parameter(1, GeneralParameterField::CurrentAirPressure),
            "Block1.AllgemeineParameter.CurrentAirPressure"
        );

        let group = resolver.measurement_group(1, 1, MeasurementType::Current);
        assert_eq!(group.len(), 4);
        assert_eq!(group[1], ("StromMax".to_string(), "Block1.Ventil1.Strom.StromMax".to_string()));
    }
}
