//! Pool device selector evaluation.
//!
//! Values are compared verbatim. Their format (lowercase hex PCI ids, MIG
//! profile names) is validated at admission, not here.

use std::collections::BTreeSet;

use api_types::DeviceRules;
use api_types::DeviceSelector;
use api_types::GpuDevice;
use api_types::HardwareInfo;

/// Whether `device` passes the pool's include rules and hits none of its
/// exclude rules. A missing selector selects every device.
pub fn matches(device: &GpuDevice, selector: Option<&DeviceSelector>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    let attributes = DeviceAttributes::of(device);

    let included = selector
        .include
        .as_ref()
        .map_or(true, |rules| attributes.satisfies_all(rules));
    let excluded = selector
        .exclude
        .as_ref()
        .is_some_and(|rules| attributes.hits_any(rules));

    included && !excluded
}

struct DeviceAttributes<'a> {
    inventory_id: &'a str,
    hardware: Option<&'a HardwareInfo>,
}

impl<'a> DeviceAttributes<'a> {
    fn of(device: &'a GpuDevice) -> Self {
        Self {
            inventory_id: device.inventory_id(),
            hardware: device.hardware(),
        }
    }

    fn product(&self) -> &str {
        self.hardware.map(|hw| hw.product.as_str()).unwrap_or_default()
    }

    fn pci_vendor(&self) -> &str {
        self.hardware
            .map(|hw| hw.pci_vendor_id.as_str())
            .unwrap_or_default()
    }

    fn pci_device(&self) -> &str {
        self.hardware
            .map(|hw| hw.pci_device_id.as_str())
            .unwrap_or_default()
    }

    fn has_mig_profile_in(&self, profiles: &BTreeSet<String>) -> bool {
        self.hardware
            .is_some_and(|hw| hw.mig_types.iter().any(|t| profiles.contains(&t.name)))
    }

    /// One outcome per non-empty category; empty categories are skipped.
    fn category_hits(&self, rules: &DeviceRules) -> Vec<bool> {
        let mut hits = Vec::with_capacity(5);
        if !rules.inventory_ids.is_empty() {
            hits.push(rules.inventory_ids.contains(self.inventory_id));
        }
        if !rules.products.is_empty() {
            hits.push(rules.products.contains(self.product()));
        }
        if !rules.pci_vendors.is_empty() {
            hits.push(rules.pci_vendors.contains(self.pci_vendor()));
        }
        if !rules.pci_devices.is_empty() {
            hits.push(rules.pci_devices.contains(self.pci_device()));
        }
        if !rules.mig_profiles.is_empty() {
            hits.push(self.has_mig_profile_in(&rules.mig_profiles));
        }
        hits
    }

    fn satisfies_all(&self, rules: &DeviceRules) -> bool {
        self.category_hits(rules).into_iter().all(|hit| hit)
    }

    fn hits_any(&self, rules: &DeviceRules) -> bool {
        self.category_hits(rules).into_iter().any(|hit| hit)
    }
}

#[cfg(test)]
mod tests {
    use api_types::GpuDeviceSpec;
    use api_types::GpuDeviceStatus;
    use api_types::MigType;

    use super::*;

    fn nvidia_device() -> GpuDevice {
        let mut device = GpuDevice::new("node-a-0000-3b-00", GpuDeviceSpec::default());
        device.status = Some(GpuDeviceStatus {
            inventory_id: "inv-a".to_string(),
            node_name: "node-a".to_string(),
            hardware: HardwareInfo {
                product: "NVIDIA A100-SXM4-80GB".to_string(),
                pci_vendor_id: "10de".to_string(),
                pci_device_id: "20b2".to_string(),
                mig_types: vec![MigType {
                    name: "1g.10gb".to_string(),
                    count: 7,
                }],
            },
            ..Default::default()
        });
        device
    }

    fn rules(f: impl FnOnce(&mut DeviceRules)) -> Option<DeviceRules> {
        let mut rules = DeviceRules::default();
        f(&mut rules);
        Some(rules)
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn no_selector_matches_everything() {
        assert!(matches(&nvidia_device(), None));
        assert!(matches(&nvidia_device(), Some(&DeviceSelector::default())));
    }

    #[test]
    fn include_vendor_matches() {
        let selector = DeviceSelector {
            include: rules(|r| r.pci_vendors = set(&["10de"])),
            exclude: None,
        };
        assert!(matches(&nvidia_device(), Some(&selector)));
    }

    #[test]
    fn exclude_vendor_wins_over_include() {
        let selector = DeviceSelector {
            include: rules(|r| r.pci_vendors = set(&["10de"])),
            exclude: rules(|r| r.pci_vendors = set(&["10de"])),
        };
        assert!(!matches(&nvidia_device(), Some(&selector)));

        let exclude_only = DeviceSelector {
            include: None,
            exclude: rules(|r| r.pci_vendors = set(&["10de"])),
        };
        assert!(!matches(&nvidia_device(), Some(&exclude_only)));
    }

    #[test]
    fn include_requires_every_specified_category() {
        let selector = DeviceSelector {
            include: rules(|r| {
                r.pci_vendors = set(&["10de"]);
                r.products = set(&["NVIDIA H100 80GB HBM3"]);
            }),
            exclude: None,
        };
        assert!(!matches(&nvidia_device(), Some(&selector)));
    }

    #[test]
    fn include_is_any_of_within_a_category() {
        let selector = DeviceSelector {
            include: rules(|r| {
                r.inventory_ids = set(&["inv-z", "inv-a"]);
                r.pci_devices = set(&["20b0", "20b2"]);
            }),
            exclude: None,
        };
        assert!(matches(&nvidia_device(), Some(&selector)));
    }

    #[test]
    fn mig_profiles_match_any_exposed_type() {
        let include = DeviceSelector {
            include: rules(|r| r.mig_profiles = set(&["1g.10gb"])),
            exclude: None,
        };
        assert!(matches(&nvidia_device(), Some(&include)));

        let other_profile = DeviceSelector {
            include: rules(|r| r.mig_profiles = set(&["3g.40gb"])),
            exclude: None,
        };
        assert!(!matches(&nvidia_device(), Some(&other_profile)));
    }

    #[test]
    fn exclude_is_any_category() {
        let selector = DeviceSelector {
            include: None,
            exclude: rules(|r| {
                r.products = set(&["something else"]);
                r.inventory_ids = set(&["inv-a"]);
            }),
        };
        assert!(!matches(&nvidia_device(), Some(&selector)));
    }

    #[test]
    fn device_without_status_only_matches_empty_rules() {
        let device = GpuDevice::new("bare", GpuDeviceSpec::default());
        let selector = DeviceSelector {
            include: rules(|r| r.pci_vendors = set(&["10de"])),
            exclude: None,
        };
        assert!(!matches(&device, Some(&selector)));
        assert!(matches(&device, None));
    }
}
