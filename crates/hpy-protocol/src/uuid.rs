//! GATT service and characteristic UUIDs.

use ::uuid::Uuid;

// Command service (HCS)
pub const HCS_SERVICE: Uuid = Uuid::from_u128(0xff899c90_18ad_11eb_adc1_0242ac120002);
pub const HCS_CMD_RX: Uuid = Uuid::from_u128(0xff899f60_18ad_11eb_adc1_0242ac120002);
pub const HCS_CMD_TX: Uuid = Uuid::from_u128(0xff89a262_18ad_11eb_adc1_0242ac120002);
pub const HCS_STREAM_TX: Uuid = Uuid::from_u128(0xff89a366_18ad_11eb_adc1_0242ac120002);
pub const HCS_DEBUG_TX: Uuid = Uuid::from_u128(0xff89a438_18ad_11eb_adc1_0242ac120002);
pub const HCS_FRAME_TX: Uuid = Uuid::from_u128(0xff89a500_18ad_11eb_adc1_0242ac120002);

// Device Information service
pub const DIS_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const DIS_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const DIS_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const DIS_FW_VERSION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const DIS_SW_VERSION: Uuid = Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);
pub const DIS_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

// Battery service
pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

// SUOTA service
pub const SUOTA_SERVICE: Uuid = Uuid::from_u128(0xd20697cb_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_MEM_DEV: Uuid = Uuid::from_u128(0xd20697cc_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_GPIO_MAP: Uuid = Uuid::from_u128(0xd20697cd_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_MEM_INFO: Uuid = Uuid::from_u128(0xd20697ce_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_PATCH_LEN: Uuid = Uuid::from_u128(0xd20697cf_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_PATCH_DATA: Uuid = Uuid::from_u128(0xd20697d0_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_STATUS: Uuid = Uuid::from_u128(0xd20697d1_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_L2CAP_PSM: Uuid = Uuid::from_u128(0xd20697d2_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_VERSION: Uuid = Uuid::from_u128(0xd20697d3_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_MTU: Uuid = Uuid::from_u128(0xd20697d4_fab2_41f9_82c3_d36af65fbb26);
pub const SUOTA_PATCH_DATA_CHAR_SIZE: Uuid =
    Uuid::from_u128(0xd20697d5_fab2_41f9_82c3_d36af65fbb26);

/// Client Characteristic Configuration descriptor.
pub const CCC_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_text_form() {
        assert_eq!(
            HCS_SERVICE.to_string(),
            "ff899c90-18ad-11eb-adc1-0242ac120002"
        );
        assert_eq!(
            SUOTA_STATUS.to_string(),
            "d20697d1-fab2-41f9-82c3-d36af65fbb26"
        );
        assert_eq!(
            DIS_FW_VERSION.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }
}
