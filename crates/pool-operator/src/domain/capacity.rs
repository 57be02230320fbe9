//! Unit accounting for pool capacity.

use api_types::GpuDevice;
use api_types::PoolResource;
use api_types::ResourceUnit;

/// Units a single device contributes to a pool with the given resource model.
///
/// MIG pools count instances of the configured profile, multiplied by
/// `slicesPerUnit`; a MIG pool without a profile counts nothing. Card pools
/// count `slicesPerUnit` per device. A non-positive `slicesPerUnit` means one.
pub fn units_for_device(device: &GpuDevice, resource: &PoolResource) -> i32 {
    match resource.unit {
        ResourceUnit::Mig => {
            let Some(profile) = resource.mig_profile.as_deref().filter(|p| !p.is_empty()) else {
                return 0;
            };
            let profile_count = device.mig_profile_count(profile);
            if profile_count <= 0 {
                return 0;
            }
            if resource.slices_per_unit > 0 {
                profile_count.saturating_mul(resource.slices_per_unit)
            } else {
                profile_count
            }
        }
        ResourceUnit::Card => {
            if resource.slices_per_unit > 0 {
                resource.slices_per_unit
            } else {
                1
            }
        }
    }
}

/// Whether another device on a node may still count towards capacity.
pub fn node_has_room(taken_on_node: i32, max_devices_per_node: Option<i32>) -> bool {
    max_devices_per_node.map_or(true, |max| taken_on_node < max)
}

#[cfg(test)]
mod tests {
    use api_types::GpuDeviceSpec;
    use api_types::GpuDeviceStatus;
    use api_types::HardwareInfo;
    use api_types::MigType;
    use similar_asserts::assert_eq;

    use super::*;

    fn mig_device(types: &[(&str, i32)]) -> GpuDevice {
        let mut device = GpuDevice::new("d0", GpuDeviceSpec::default());
        device.status = Some(GpuDeviceStatus {
            hardware: HardwareInfo {
                mig_types: types
                    .iter()
                    .map(|(name, count)| MigType {
                        name: name.to_string(),
                        count: *count,
                    })
                    .collect(),
                ..Default::default()
            },
            ..Default::default()
        });
        device
    }

    fn mig_resource(profile: Option<&str>, slices_per_unit: i32) -> PoolResource {
        PoolResource {
            unit: ResourceUnit::Mig,
            mig_profile: profile.map(str::to_string),
            slices_per_unit,
            ..Default::default()
        }
    }

    #[test]
    fn mig_units_multiply_by_slices() {
        let device = mig_device(&[("1g.10gb", 2)]);

        assert_eq!(
            units_for_device(&device, &mig_resource(Some("1g.10gb"), 2)),
            4
        );
        assert_eq!(
            units_for_device(&device, &mig_resource(Some("1g.10gb"), 0)),
            2
        );
        assert_eq!(
            units_for_device(&device, &mig_resource(Some("2g.20gb"), 2)),
            0
        );
    }

    #[test]
    fn mig_without_profile_fails_closed() {
        let device = mig_device(&[("1g.10gb", 2)]);
        assert_eq!(units_for_device(&device, &mig_resource(None, 2)), 0);
        assert_eq!(units_for_device(&device, &mig_resource(Some(""), 2)), 0);
    }

    #[test]
    fn card_units_default_to_one() {
        let device = mig_device(&[]);
        let mut resource = PoolResource::default();
        assert_eq!(units_for_device(&device, &resource), 1);

        resource.slices_per_unit = 4;
        assert_eq!(units_for_device(&device, &resource), 4);

        resource.slices_per_unit = -1;
        assert_eq!(units_for_device(&device, &resource), 1);
    }

    #[test]
    fn node_room_respects_cap() {
        assert!(node_has_room(100, None));
        assert!(node_has_room(0, Some(1)));
        assert!(!node_has_room(1, Some(1)));
        assert!(!node_has_room(0, Some(0)));
    }
}
